//! Object-codec and document round trips.

use pdforge::{
    dictionary, parser, serialize_object, Object, PageTreeReader, PageTreeWriter, Reader, StringFormat, Writer,
    WriterOptions,
};

fn emit_and_parse(obj: &Object) -> Object {
    let mut bytes = serialize_object(obj);
    bytes.push(b' ');
    parser::direct_object(&bytes).expect("canonical output must re-parse")
}

#[test]
fn direct_objects_survive_emit_parse() {
    let samples = vec![
        Object::Null,
        Object::Boolean(true),
        Object::Boolean(false),
        Object::Integer(0),
        Object::Integer(-987654321),
        Object::Real(0.5),
        Object::Real(-12.25),
        Object::name("Name"),
        Object::Name(b"with spaces\x01".to_vec()),
        Object::Name(Vec::new()),
        Object::string_literal("plain text"),
        Object::string_literal("escapes ()\\ and more"),
        Object::String(vec![0, 1, 2, 0xFF], StringFormat::Hexadecimal),
        Object::Reference((42, 7)),
        Object::Array(vec![
            Object::Integer(1),
            Object::name("Two"),
            Object::Array(vec![Object::Real(3.5), Object::Null]),
        ]),
        Object::Dictionary(dictionary! {
            "Kind" => Object::name("Sample"),
            "Nested" => dictionary! { "Deep" => vec![Object::Integer(9)] },
            "Ref" => Object::Reference((3, 0)),
        }),
    ];
    for obj in &samples {
        assert_eq!(&emit_and_parse(obj), obj, "object {obj:?}");
    }
}

#[test]
fn real_emission_is_bounded_not_lossy_for_round_values() {
    // Values with at most five fractional digits survive numerically;
    // whole reals may come back as integers.
    for value in [0.5, -0.12345, 100.0, 0.00001, -99999.5] {
        let parsed = emit_and_parse(&Object::Real(value));
        assert!((parsed.as_number().unwrap() - value).abs() < 1e-9, "{value}");
    }
}

#[test]
fn single_page_document_end_to_end() {
    let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
    let mut pages = PageTreeWriter::default();
    let media_box = vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(612),
        Object::Integer(792),
    ];
    pages
        .append_page(&mut writer, dictionary! { "MediaBox" => media_box.clone() })
        .unwrap();
    let root = pages.close(&mut writer).unwrap();
    let catalog = writer
        .add(dictionary! { "Type" => Object::name("Catalog"), "Pages" => root })
        .unwrap();
    writer.set_root(catalog);
    let bytes = writer.close().unwrap();

    let reader = Reader::open(bytes).unwrap();
    let tree = PageTreeReader::from_catalog(&reader).unwrap();
    assert_eq!(tree.num_pages().unwrap(), 1);
    let (_, page) = tree.get_page(0).unwrap();
    assert_eq!(page.get(b"MediaBox").unwrap().as_array().unwrap(), &media_box);
}

#[test]
fn incremental_update_appends_a_revision() {
    // First revision: object 5 holds (hello).
    let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
    for _ in 0..4 {
        writer.alloc();
    }
    let five = writer.alloc();
    assert_eq!(five, (5, 0));
    writer.put(five, Object::string_literal("hello")).unwrap();
    let catalog = writer
        .add(dictionary! { "Type" => Object::name("Catalog") })
        .unwrap();
    writer.set_root(catalog);
    let original = writer.close().unwrap();

    // Second revision: a fresh reference alongside the old one.
    let first_reading = Reader::open(original.clone()).unwrap();
    let first_id = first_reading.file_id().map(|(a, _)| a.to_vec()).unwrap();
    let mut update = Writer::incremental(Vec::new(), &first_reading, WriterOptions::default()).unwrap();
    let next = update.alloc();
    update.put(next, Object::string_literal("world")).unwrap();
    let updated = update.close().unwrap();

    // The original bytes are byte-for-byte intact.
    assert!(updated.starts_with(&original));
    let eof_count = count_occurrences(&updated, b"%%EOF");
    assert_eq!(eof_count, 2, "one EOF per revision");
    assert_eq!(count_occurrences(&updated, b"trailer"), 2);

    let reader = Reader::open(updated).unwrap();
    assert_eq!(reader.get_object((5, 0)).unwrap().as_string().unwrap(), b"hello");
    assert_eq!(reader.get_object(next).unwrap().as_string().unwrap(), b"world");
    // ID[0] is preserved, ID[1] regenerated.
    let (id0, id1) = reader.file_id().unwrap();
    assert_eq!(id0, first_id.as_slice());
    assert_ne!(id0, id1);
}

#[test]
fn later_revision_overrides_an_object() {
    let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
    let value = writer.add(Object::string_literal("old")).unwrap();
    let catalog = writer
        .add(dictionary! { "Type" => Object::name("Catalog") })
        .unwrap();
    writer.set_root(catalog);
    let original = writer.close().unwrap();

    let first_reading = Reader::open(original).unwrap();
    let mut update = Writer::incremental(Vec::new(), &first_reading, WriterOptions::default()).unwrap();
    update.put(value, Object::string_literal("new")).unwrap();
    let updated = update.close().unwrap();

    let reader = Reader::open(updated).unwrap();
    assert_eq!(reader.get_object(value).unwrap().as_string().unwrap(), b"new");
}

#[test]
fn save_to_disk_and_load_again() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("single_page.pdf");

    let file = std::fs::File::create(&path).unwrap();
    let mut writer = Writer::new(std::io::BufWriter::new(file), "1.4", WriterOptions::default()).unwrap();
    let mut pages = PageTreeWriter::default();
    pages.append_page(&mut writer, dictionary! {}).unwrap();
    let root = pages.close(&mut writer).unwrap();
    let catalog = writer
        .add(dictionary! { "Type" => Object::name("Catalog"), "Pages" => root })
        .unwrap();
    writer.set_root(catalog);
    writer.close().unwrap();

    let reader = Reader::open(std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(PageTreeReader::from_catalog(&reader).unwrap().num_pages().unwrap(), 1);
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    let mut count = 0;
    let mut pos = 0;
    while pos + needle.len() <= haystack.len() {
        if &haystack[pos..pos + needle.len()] == needle {
            count += 1;
            pos += needle.len();
        } else {
            pos += 1;
        }
    }
    count
}
