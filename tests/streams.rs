//! Stream writing through filter chains, predictors and placeholders.

use pdforge::filters::Filter;
use pdforge::{dictionary, Object, Reader, Writer, WriterOptions};
use std::io::Write as _;

fn close_with_catalog(mut writer: Writer<Vec<u8>>) -> Vec<u8> {
    let catalog = writer
        .add(dictionary! { "Type" => Object::name("Catalog") })
        .unwrap();
    writer.set_root(catalog);
    writer.close().unwrap()
}

#[test]
fn flate_stream_with_png_up_predictor() {
    // A 4x4 greyscale image, one byte per pixel.
    let image: Vec<u8> = vec![
        10, 20, 30, 40, //
        11, 21, 31, 41, //
        12, 22, 32, 42, //
        99, 98, 97, 96,
    ];

    let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
    let id = writer.alloc();
    let dict = dictionary! {
        "DecodeParms" => dictionary! {
            "Predictor" => 12,
            "Columns" => 4,
            "Colors" => 1,
            "BitsPerComponent" => 8,
        },
    };
    let mut sink = writer.open_stream(id, dict, &[Filter::Flate]).unwrap();
    sink.write_all(&image).unwrap();
    sink.finish().unwrap();
    let bytes = close_with_catalog(writer);

    let reader = Reader::open(bytes).unwrap();
    let stream = reader.get_stream(&Object::Reference(id)).unwrap();
    assert_eq!(stream.dict.get(b"Filter").unwrap().as_name().unwrap(), b"FlateDecode");
    // The stored body is filtered, not the raw pixels.
    assert_ne!(stream.content, image);
    assert_eq!(stream.decoded_content().unwrap(), image);
}

#[test]
fn chained_filters_decode_in_declared_order() {
    let body = b"chained through two filters".repeat(8);
    let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
    let id = writer.alloc();
    let mut sink = writer
        .open_stream(id, dictionary! {}, &[Filter::Ascii85, Filter::Flate])
        .unwrap();
    sink.write_all(&body).unwrap();
    sink.finish().unwrap();
    let bytes = close_with_catalog(writer);

    let reader = Reader::open(bytes).unwrap();
    let stream = reader.get_stream(&Object::Reference(id)).unwrap();
    let filters = stream.filters().unwrap();
    assert_eq!(filters, vec![b"ASCII85Decode".as_slice(), b"FlateDecode".as_slice()]);
    assert_eq!(reader.decode_stream(&stream, 8).unwrap(), body);
}

#[test]
fn declared_length_matches_the_encoded_body() {
    let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
    let id = writer.alloc();
    let mut sink = writer.open_stream(id, dictionary! {}, &[]).unwrap();
    sink.write_all(b"exactly these bytes").unwrap();
    sink.finish().unwrap();
    let bytes = close_with_catalog(writer);

    let reader = Reader::open(bytes).unwrap();
    let stream = reader.get_stream(&Object::Reference(id)).unwrap();
    assert_eq!(stream.dict.get(b"Length").unwrap().as_i64().unwrap(), 19);
    assert_eq!(stream.content, b"exactly these bytes");
}

#[test]
fn opaque_image_bodies_copy_bit_for_bit() {
    // A DCT body passes through untouched in both directions.
    let jpeg_ish: Vec<u8> = (0..=255u8).cycle().take(600).collect();
    let mut writer = Writer::new(Vec::new(), "1.4", WriterOptions::default()).unwrap();
    let id = writer.alloc();
    let dict = dictionary! { "Subtype" => Object::name("Image") };
    let mut sink = writer.open_stream(id, dict, &[Filter::Dct]).unwrap();
    sink.write_all(&jpeg_ish).unwrap();
    sink.finish().unwrap();
    let bytes = close_with_catalog(writer);

    let reader = Reader::open(bytes).unwrap();
    let stream = reader.get_stream(&Object::Reference(id)).unwrap();
    assert_eq!(stream.content, jpeg_ish);
    assert_eq!(stream.decoded_content().unwrap(), jpeg_ish);
}

#[test]
fn human_readable_output_is_prettier_but_equivalent() {
    let build = |options: WriterOptions| {
        let mut writer = Writer::new(Vec::new(), "1.4", options).unwrap();
        let id = writer
            .add(dictionary! {
                "Kind" => Object::name("Test"),
                "Inner" => dictionary! { "A" => 1, "B" => 2 },
            })
            .unwrap();
        (close_with_catalog(writer), id)
    };

    let mut human = WriterOptions::default();
    human.human_readable = true;
    let (pretty_bytes, pretty_id) = build(human);
    let (dense_bytes, dense_id) = build(WriterOptions::default());
    assert!(pretty_bytes.len() > dense_bytes.len());

    let pretty = Reader::open(pretty_bytes).unwrap();
    let dense = Reader::open(dense_bytes).unwrap();
    assert_eq!(
        pretty.get_dict(&Object::Reference(pretty_id)).unwrap(),
        dense.get_dict(&Object::Reference(dense_id)).unwrap()
    );
}
