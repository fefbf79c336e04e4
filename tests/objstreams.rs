//! Compressed-object batches and the xref transcript property.

use pdforge::{dictionary, Error, Object, Reader, Writer, WriterOptions};

#[test]
fn compressed_objects_resolve_transparently() {
    let mut writer = Writer::new(Vec::new(), "1.5", WriterOptions::default()).unwrap();

    // A mix of plainly written and batch-compressed objects.
    let plain = writer.add(Object::string_literal("uncompressed")).unwrap();
    let ids: Vec<_> = (0..5).map(|_| writer.alloc()).collect();
    let objects: Vec<Object> = vec![
        Object::Integer(42),
        Object::name("Compressed"),
        Object::string_literal("packed away"),
        Object::Array(vec![Object::Integer(1), Object::Reference(plain)]),
        Object::Dictionary(dictionary! { "Deep" => dictionary! { "Key" => 7 } }),
    ];
    writer.write_compressed(&ids, &objects).unwrap();

    let catalog = writer
        .add(dictionary! { "Type" => Object::name("Catalog") })
        .unwrap();
    writer.set_root(catalog);
    let bytes = writer.close().unwrap();

    // 1.5 defaults to the xref-stream form.
    assert!(bytes.windows(5).any(|w| w == b"/XRef"));

    let reader = Reader::open(bytes).unwrap();
    for (id, expected) in ids.iter().zip(&objects) {
        assert_eq!(&reader.get_object(*id).unwrap(), expected, "object {id:?}");
    }
    assert_eq!(reader.get_object(plain).unwrap().as_string().unwrap(), b"uncompressed");

    // A reference inside a compressed object still resolves.
    let array = reader.get_object(ids[3]).unwrap();
    let inner = reader.resolve(&array.as_array().unwrap()[1]).unwrap();
    assert_eq!(inner.as_string().unwrap(), b"uncompressed");
}

#[test]
fn whole_transcript_reads_back() {
    let mut writer = Writer::new(Vec::new(), "1.5", WriterOptions::default()).unwrap();
    let mut transcript: Vec<(pdforge::ObjectId, Object)> = Vec::new();

    for i in 0..40i64 {
        let id = writer.alloc();
        let obj = match i % 4 {
            0 => Object::Integer(i),
            1 => Object::string_literal(format!("value {i}")),
            2 => Object::Array(vec![Object::Integer(i), Object::Boolean(i % 8 == 2)]),
            _ => Object::Dictionary(dictionary! { "Index" => i }),
        };
        if i % 5 == 0 {
            writer.write_compressed(&[id], &[obj.clone()]).unwrap();
        } else {
            writer.put(id, obj.clone()).unwrap();
        }
        transcript.push((id, obj));
    }

    let catalog = writer
        .add(dictionary! { "Type" => Object::name("Catalog") })
        .unwrap();
    writer.set_root(catalog);
    let reader = Reader::open(writer.close().unwrap()).unwrap();

    for (id, expected) in &transcript {
        assert_eq!(&reader.get_object(*id).unwrap(), expected, "object {id:?}");
    }
}

#[test]
fn catalog_refuses_compression() {
    let mut writer = Writer::new(Vec::new(), "1.5", WriterOptions::default()).unwrap();
    let id = writer.alloc();
    let result = writer.write_compressed(
        &[id],
        &[Object::Dictionary(dictionary! { "Type" => Object::name("Catalog") })],
    );
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[test]
fn object_streams_are_gated_to_pdf_15() {
    let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
    let id = writer.alloc();
    assert!(matches!(
        writer.write_compressed(&[id], &[Object::Integer(1)]),
        Err(Error::VersionTooLow { .. })
    ));
}
