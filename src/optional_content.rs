//! Optional content: togglable groups, membership policies and boolean
//! visibility expressions.
//!
//! Group identity is the object reference, never the name; two groups may
//! share a name and stay distinct.

use crate::writer::Writer;
use crate::{decode_text_string, dictionary, text_string, Dictionary, Error, Object, ObjectId, Reader, Result};
use std::collections::BTreeMap;
use std::io::Write;

/// Simple membership policies over a group list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityPolicy {
    #[default]
    AnyOn,
    AllOn,
    AnyOff,
    AllOff,
}

impl VisibilityPolicy {
    fn name(self) -> &'static str {
        match self {
            VisibilityPolicy::AnyOn => "AnyOn",
            VisibilityPolicy::AllOn => "AllOn",
            VisibilityPolicy::AnyOff => "AnyOff",
            VisibilityPolicy::AllOff => "AllOff",
        }
    }

    fn from_name(name: &[u8]) -> Option<VisibilityPolicy> {
        match name {
            b"AnyOn" => Some(VisibilityPolicy::AnyOn),
            b"AllOn" => Some(VisibilityPolicy::AllOn),
            b"AnyOff" => Some(VisibilityPolicy::AnyOff),
            b"AllOff" => Some(VisibilityPolicy::AllOff),
            _ => None,
        }
    }
}

/// Boolean tree over group references. `Not` takes exactly one operand by
/// construction; `And`/`Or` must carry at least one.
#[derive(Debug, Clone, PartialEq)]
pub enum VisibilityExpression {
    Group(ObjectId),
    Not(Box<VisibilityExpression>),
    And(Vec<VisibilityExpression>),
    Or(Vec<VisibilityExpression>),
}

impl VisibilityExpression {
    /// Textbook recursive evaluation; groups missing from `state` count as
    /// hidden.
    pub fn eval(&self, state: &BTreeMap<ObjectId, bool>) -> bool {
        match self {
            VisibilityExpression::Group(id) => state.get(id).copied().unwrap_or(false),
            VisibilityExpression::Not(inner) => !inner.eval(state),
            VisibilityExpression::And(items) => items.iter().all(|item| item.eval(state)),
            VisibilityExpression::Or(items) => items.iter().any(|item| item.eval(state)),
        }
    }

    /// The `VE` array form: `[/And VE…]`, `[/Or VE…]`, `[/Not VE]`.
    pub fn to_object(&self) -> Result<Object> {
        let array = match self {
            VisibilityExpression::Group(id) => return Ok(Object::Reference(*id)),
            VisibilityExpression::Not(inner) => {
                vec![Object::name("Not"), inner.to_object()?]
            }
            VisibilityExpression::And(items) | VisibilityExpression::Or(items) => {
                if items.is_empty() {
                    return Err(Error::InvalidInput("And/Or need at least one operand"));
                }
                let tag = if matches!(self, VisibilityExpression::And(_)) {
                    "And"
                } else {
                    "Or"
                };
                let mut array = vec![Object::name(tag)];
                for item in items {
                    array.push(item.to_object()?);
                }
                array
            }
        };
        Ok(Object::Array(array))
    }

    pub fn from_object(reader: &Reader, object: &Object) -> Result<VisibilityExpression> {
        // A bare reference is a group leaf; it must stay a reference to
        // preserve identity, so it is not resolved here.
        if let Ok(id) = object.as_reference() {
            return Ok(VisibilityExpression::Group(id));
        }
        let array = object.as_array()?;
        let (head, rest) = array.split_first().ok_or(Error::InvalidInput("empty visibility expression"))?;
        let operands: Vec<VisibilityExpression> = rest
            .iter()
            .map(|item| VisibilityExpression::from_object(reader, item))
            .collect::<Result<_>>()?;
        match head.as_name()? {
            b"Not" => match <[VisibilityExpression; 1]>::try_from(operands) {
                Ok([inner]) => Ok(VisibilityExpression::Not(Box::new(inner))),
                Err(_) => Err(Error::InvalidInput("Not takes exactly one operand")),
            },
            b"And" if !operands.is_empty() => Ok(VisibilityExpression::And(operands)),
            b"Or" if !operands.is_empty() => Ok(VisibilityExpression::Or(operands)),
            _ => Err(Error::InvalidInput("unknown visibility operator")),
        }
    }
}

/// Usage metadata attached to a group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupUsage {
    /// Producing application and the kind of content it marks.
    pub creator: Option<(String, Vec<u8>)>,
    /// Language tag plus the preferred flag.
    pub language: Option<(String, bool)>,
    /// Magnification range in which the group is on.
    pub zoom: Option<(f64, f64)>,
    pub print_state: Option<bool>,
    pub view_state: Option<bool>,
    /// User kind (`Ind`, `Ttl`, `Org`) and names.
    pub user: Option<(Vec<u8>, Vec<String>)>,
}

impl GroupUsage {
    fn is_empty(&self) -> bool {
        self.creator.is_none()
            && self.language.is_none()
            && self.zoom.is_none()
            && self.print_state.is_none()
            && self.view_state.is_none()
            && self.user.is_none()
    }

    fn to_dict(&self) -> Dictionary {
        let state_name = |on: bool| Object::name(if on { "ON" } else { "OFF" });
        let mut dict = Dictionary::new();
        if let Some((creator, subtype)) = &self.creator {
            dict.set(
                "CreatorInfo",
                dictionary! {
                    "Creator" => text_string(creator),
                    "Subtype" => Object::Name(subtype.clone()),
                },
            );
        }
        if let Some((lang, preferred)) = &self.language {
            dict.set(
                "Language",
                dictionary! {
                    "Lang" => text_string(lang),
                    "Preferred" => state_name(*preferred),
                },
            );
        }
        if let Some((min, max)) = self.zoom {
            dict.set("Zoom", dictionary! { "min" => min, "max" => max });
        }
        if let Some(on) = self.print_state {
            dict.set("Print", dictionary! { "PrintState" => state_name(on) });
        }
        if let Some(on) = self.view_state {
            dict.set("View", dictionary! { "ViewState" => state_name(on) });
        }
        if let Some((kind, names)) = &self.user {
            let name_value = match names.as_slice() {
                [single] => text_string(single),
                many => Object::Array(many.iter().map(|n| text_string(n)).collect()),
            };
            dict.set(
                "User",
                dictionary! { "Type" => Object::Name(kind.clone()), "Name" => name_value },
            );
        }
        dict
    }

    fn from_dict(reader: &Reader, dict: &Dictionary) -> Result<GroupUsage> {
        let mut usage = GroupUsage::default();
        let state_on = |obj: &Object| obj.as_name().map(|n| n == b"ON").unwrap_or(false);

        if let Some(value) = dict.get_opt(b"CreatorInfo") {
            let info = reader.get_dict(value)?;
            let creator = info.get_opt(b"Creator").map(decode_text_string).transpose()?.unwrap_or_default();
            let subtype = info
                .get_opt(b"Subtype")
                .and_then(|s| s.as_name().ok())
                .unwrap_or_default()
                .to_vec();
            usage.creator = Some((creator, subtype));
        }
        if let Some(value) = dict.get_opt(b"Language") {
            let info = reader.get_dict(value)?;
            let lang = info.get_opt(b"Lang").map(decode_text_string).transpose()?.unwrap_or_default();
            let preferred = info.get_opt(b"Preferred").map(state_on).unwrap_or(false);
            usage.language = Some((lang, preferred));
        }
        if let Some(value) = dict.get_opt(b"Zoom") {
            let info = reader.get_dict(value)?;
            let min = info.get_opt(b"min").map(|v| reader.get_number(v)).transpose()?.unwrap_or(0.0);
            let max = info
                .get_opt(b"max")
                .map(|v| reader.get_number(v))
                .transpose()?
                .unwrap_or(f64::MAX);
            usage.zoom = Some((min, max));
        }
        if let Some(value) = dict.get_opt(b"Print") {
            let info = reader.get_dict(value)?;
            usage.print_state = info.get_opt(b"PrintState").map(state_on);
        }
        if let Some(value) = dict.get_opt(b"View") {
            let info = reader.get_dict(value)?;
            usage.view_state = info.get_opt(b"ViewState").map(state_on);
        }
        if let Some(value) = dict.get_opt(b"User") {
            let info = reader.get_dict(value)?;
            let kind = info
                .get_opt(b"Type")
                .and_then(|t| t.as_name().ok())
                .unwrap_or_default()
                .to_vec();
            let names = match info.get_opt(b"Name") {
                Some(Object::Array(items)) => items.iter().map(decode_text_string).collect::<Result<_>>()?,
                Some(single) => vec![decode_text_string(single)?],
                None => Vec::new(),
            };
            usage.user = Some((kind, names));
        }
        Ok(usage)
    }
}

/// A named togglable layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionalContentGroup {
    pub name: String,
    /// Intent names; empty means the default `View`.
    pub intent: Vec<Vec<u8>>,
    pub usage: GroupUsage,
}

impl OptionalContentGroup {
    pub fn new(name: &str) -> OptionalContentGroup {
        OptionalContentGroup {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Write the `OCG` dictionary; the returned reference is the group's
    /// identity.
    pub fn embed<W: Write>(&self, writer: &mut Writer<W>) -> Result<ObjectId> {
        let mut dict = dictionary! {
            "Type" => Object::name("OCG"),
            "Name" => text_string(&self.name),
        };
        match self.intent.as_slice() {
            [] => {}
            [single] => dict.set("Intent", Object::Name(single.clone())),
            many => dict.set(
                "Intent",
                Object::Array(many.iter().map(|n| Object::Name(n.clone())).collect()),
            ),
        }
        if !self.usage.is_empty() {
            dict.set("Usage", self.usage.to_dict());
        }
        writer.add(dict)
    }

    pub fn extract(reader: &Reader, id: ObjectId) -> Result<OptionalContentGroup> {
        let dict = reader.get_dict(&Object::Reference(id))?;
        if !dict.has_type(b"OCG") {
            return Err(Error::ObjectType {
                expected: "OCG dictionary",
                found: "Dictionary",
            });
        }
        let name = dict.get_opt(b"Name").map(decode_text_string).transpose()?.unwrap_or_default();
        let intent = match dict.get_opt(b"Intent") {
            Some(Object::Name(single)) => vec![single.clone()],
            Some(Object::Array(items)) => items.iter().filter_map(|i| i.as_name().ok().map(<[u8]>::to_vec)).collect(),
            _ => Vec::new(),
        };
        let usage = match dict.get_opt(b"Usage") {
            Some(value) => GroupUsage::from_dict(reader, &reader.get_dict(value)?)?,
            None => GroupUsage::default(),
        };
        Ok(OptionalContentGroup { name, intent, usage })
    }
}

/// An `OCMD`: content visibility driven by groups, either through a simple
/// policy or a visibility expression. A non-null expression makes the
/// policy fields irrelevant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Membership {
    pub groups: Vec<ObjectId>,
    pub policy: VisibilityPolicy,
    pub expression: Option<VisibilityExpression>,
}

impl Membership {
    pub fn is_visible(&self, state: &BTreeMap<ObjectId, bool>) -> bool {
        if let Some(expression) = &self.expression {
            return expression.eval(state);
        }
        let on = |id: &ObjectId| state.get(id).copied().unwrap_or(false);
        if self.groups.is_empty() {
            return true;
        }
        match self.policy {
            VisibilityPolicy::AnyOn => self.groups.iter().any(|id| on(id)),
            VisibilityPolicy::AllOn => self.groups.iter().all(|id| on(id)),
            VisibilityPolicy::AnyOff => self.groups.iter().any(|id| !on(id)),
            VisibilityPolicy::AllOff => self.groups.iter().all(|id| !on(id)),
        }
    }

    pub fn embed<W: Write>(&self, writer: &mut Writer<W>) -> Result<ObjectId> {
        let mut dict = dictionary! { "Type" => Object::name("OCMD") };
        match self.groups.as_slice() {
            [] => {}
            [single] => dict.set("OCGs", Object::Reference(*single)),
            many => dict.set(
                "OCGs",
                Object::Array(many.iter().map(|id| Object::Reference(*id)).collect()),
            ),
        }
        dict.set("P", Object::name(self.policy.name()));
        if let Some(expression) = &self.expression {
            writer.check_version("visibility expressions", "1.6")?;
            dict.set("VE", expression.to_object()?);
        }
        writer.add(dict)
    }

    pub fn extract(reader: &Reader, id: ObjectId) -> Result<Membership> {
        let dict = reader.get_dict(&Object::Reference(id))?;
        let groups = match dict.get_opt(b"OCGs") {
            Some(Object::Reference(single)) => vec![*single],
            Some(Object::Array(items)) => items.iter().filter_map(|i| i.as_reference().ok()).collect(),
            _ => Vec::new(),
        };
        let policy = dict
            .get_opt(b"P")
            .and_then(|p| p.as_name().ok())
            .and_then(VisibilityPolicy::from_name)
            .unwrap_or_default();
        let expression = match dict.get_opt(b"VE") {
            Some(value) => Some(VisibilityExpression::from_object(reader, value)?),
            None => None,
        };
        Ok(Membership {
            groups,
            policy,
            expression,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WriterOptions;

    fn state(pairs: &[(ObjectId, bool)]) -> BTreeMap<ObjectId, bool> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn expression_semantics_match_the_textbook() {
        let (a, b, c) = ((1, 0), (2, 0), (3, 0));
        // Or(A, And(Not(B), C))
        let expr = VisibilityExpression::Or(vec![
            VisibilityExpression::Group(a),
            VisibilityExpression::And(vec![
                VisibilityExpression::Not(Box::new(VisibilityExpression::Group(b))),
                VisibilityExpression::Group(c),
            ]),
        ]);
        assert!(!expr.eval(&state(&[(a, false), (b, true), (c, true)])));
        assert!(expr.eval(&state(&[(a, false), (b, false), (c, true)])));
        assert!(expr.eval(&state(&[(a, true), (b, true), (c, false)])));
    }

    #[test]
    fn policies_cover_all_four_quantifiers() {
        let (a, b) = ((1, 0), (2, 0));
        let mut membership = Membership {
            groups: vec![a, b],
            ..Default::default()
        };
        let mixed = state(&[(a, true), (b, false)]);

        membership.policy = VisibilityPolicy::AnyOn;
        assert!(membership.is_visible(&mixed));
        membership.policy = VisibilityPolicy::AllOn;
        assert!(!membership.is_visible(&mixed));
        membership.policy = VisibilityPolicy::AnyOff;
        assert!(membership.is_visible(&mixed));
        membership.policy = VisibilityPolicy::AllOff;
        assert!(!membership.is_visible(&mixed));
    }

    #[test]
    fn expression_overrides_policy() {
        let a = (1, 0);
        let membership = Membership {
            groups: vec![a],
            policy: VisibilityPolicy::AllOn,
            expression: Some(VisibilityExpression::Not(Box::new(VisibilityExpression::Group(a)))),
        };
        assert!(membership.is_visible(&state(&[(a, false)])));
        assert!(!membership.is_visible(&state(&[(a, true)])));
    }

    #[test]
    fn embed_extract_round_trip() {
        let mut writer = Writer::new(Vec::new(), "1.6", WriterOptions::default()).unwrap();

        let mut group = OptionalContentGroup::new("Annotations");
        group.intent = vec![b"Design".to_vec()];
        group.usage.creator = Some(("layout-tool".to_string(), b"Artwork".to_vec()));
        group.usage.zoom = Some((0.5, 4.0));
        group.usage.print_state = Some(true);
        group.usage.user = Some((b"Ind".to_vec(), vec!["alice".to_string(), "bob".to_string()]));
        let a = group.embed(&mut writer).unwrap();
        let b = OptionalContentGroup::new("Annotations").embed(&mut writer).unwrap();
        let c = OptionalContentGroup::new("Grid").embed(&mut writer).unwrap();
        assert_ne!(a, b, "identity is the reference, not the name");

        let expr = VisibilityExpression::Or(vec![
            VisibilityExpression::Group(a),
            VisibilityExpression::And(vec![
                VisibilityExpression::Not(Box::new(VisibilityExpression::Group(b))),
                VisibilityExpression::Group(c),
            ]),
        ]);
        let membership = Membership {
            groups: vec![a, b, c],
            policy: VisibilityPolicy::AnyOn,
            expression: Some(expr.clone()),
        };
        let membership_id = membership.embed(&mut writer).unwrap();

        let catalog = writer
            .add(dictionary! { "Type" => Object::name("Catalog") })
            .unwrap();
        writer.set_root(catalog);
        let reader = Reader::open(writer.close().unwrap()).unwrap();

        let restored_group = OptionalContentGroup::extract(&reader, a).unwrap();
        assert_eq!(restored_group, group);

        let restored = Membership::extract(&reader, membership_id).unwrap();
        assert_eq!(restored.expression.as_ref(), Some(&expr));

        // The whole truth table survives the round-trip.
        for bits in 0..8u8 {
            let sigma = state(&[(a, bits & 1 != 0), (b, bits & 2 != 0), (c, bits & 4 != 0)]);
            assert_eq!(restored.is_visible(&sigma), membership.is_visible(&sigma), "bits {bits:03b}");
        }
    }

    #[test]
    fn visibility_expressions_are_version_gated() {
        let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
        let membership = Membership {
            groups: vec![(1, 0)],
            policy: VisibilityPolicy::AnyOn,
            expression: Some(VisibilityExpression::Group((1, 0))),
        };
        assert!(matches!(
            membership.embed(&mut writer),
            Err(Error::VersionTooLow { .. })
        ));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(VisibilityExpression::And(vec![]).to_object().is_err());

        let mut writer = Writer::new(Vec::new(), "1.6", WriterOptions::default()).unwrap();
        let catalog = writer
            .add(dictionary! { "Type" => Object::name("Catalog") })
            .unwrap();
        writer.set_root(catalog);
        let reader = Reader::open(writer.close().unwrap()).unwrap();

        // Not with two operands.
        let bad = Object::Array(vec![
            Object::name("Not"),
            Object::Reference((1, 0)),
            Object::Reference((2, 0)),
        ]);
        assert!(VisibilityExpression::from_object(&reader, &bad).is_err());
    }
}
