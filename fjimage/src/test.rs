use super::*;

fn sample_image() -> Image {
    Image::new(
        64,
        vec![
            Segment::new(0, 128, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]),
            Segment::new(128, 64, vec![0xff; 8]),
        ],
    )
}

#[test]
fn write_read_round_trip_uncompressed() {
    let image = sample_image();
    let mut buf = Vec::new();
    write(&mut buf, &image, None).unwrap();

    let read_back = read(&mut &buf[..], &ZlibCodec).unwrap();
    assert_eq!(image, read_back);
}

#[test]
fn write_read_round_trip_compressed() {
    let image = sample_image();
    let mut buf = Vec::new();
    write(&mut buf, &image, Some(&ZlibCodec)).unwrap();

    let read_back = read(&mut &buf[..], &ZlibCodec).unwrap();
    assert_eq!(image, read_back);
}

#[test]
fn bad_magic_is_rejected() {
    let image = sample_image();
    let mut buf = Vec::new();
    write(&mut buf, &image, None).unwrap();
    buf[0] = b'X';
    // Corrupting the magic also invalidates the CRC, so recompute it to
    // isolate the magic check from the CRC check.
    let body_len = buf.len() - 4;
    let crc = crc32fast::hash(&buf[..body_len]);
    buf[body_len..].copy_from_slice(&crc.to_le_bytes());

    let err = read(&mut &buf[..], &ZlibCodec).unwrap_err();
    assert!(matches!(err, ImageError::BadMagic));
}

#[test]
fn crc_mismatch_is_detected() {
    let image = sample_image();
    let mut buf = Vec::new();
    write(&mut buf, &image, None).unwrap();
    let last = buf.len() - 1;
    buf[last] ^= 0xff;

    let err = read(&mut &buf[..], &ZlibCodec).unwrap_err();
    assert!(matches!(err, ImageError::CrcMismatch));
}

#[test]
fn misaligned_segment_rejected_on_write() {
    let image = Image::new(64, vec![Segment::new(3, 64, vec![0; 8])]);
    let err = write(&mut Vec::new(), &image, None).unwrap_err();
    assert!(matches!(err, ImageError::Misaligned { .. }));
}

#[test]
fn width_mismatch_is_rejected() {
    let image = sample_image();
    let err = image.expect_width(32).unwrap_err();
    assert!(matches!(err, ImageError::WidthMismatch { expected: 32, found: 64 }));
    image.expect_width(64).unwrap();
}

#[test]
fn file_round_trip() {
    let image = sample_image();
    let path = std::env::temp_dir().join("fjimage_test_round_trip.fjm");
    write_file(&path, &image, None).unwrap();
    let read_back = read_file(&path, &ZlibCodec).unwrap();
    assert_eq!(image, read_back);
    std::fs::remove_file(&path).unwrap();
}
