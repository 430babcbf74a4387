// PLY reader tests
// Incremental parsing across arbitrary chunk boundaries, all three encodings, error paths

mod common;

use common::{float_ply, float_ply_be};
use gsplat_sort::ply::{PlyReader, PropertyKind, ScalarType, MAX_HEADER_BYTES};
use gsplat_sort::{read_ply, PlyElement, PlyError, PlyFormat};

fn sample_rows() -> Vec<Vec<f32>> {
    vec![
        vec![1.0, 2.0, 3.0],
        vec![-4.5, 0.25, 6.0],
        vec![7.0, -8.0, 9.5],
    ]
}

fn column(elements: &[PlyElement], name: &str) -> Vec<f32> {
    elements[0]
        .storage(name)
        .map(|s| s.to_f32_vec())
        .unwrap_or_default()
}

fn parse_in_chunks(bytes: &[u8], chunk: usize) -> Result<Vec<PlyElement>, PlyError> {
    let mut reader = PlyReader::new();
    for piece in bytes.chunks(chunk) {
        reader.push(piece)?;
    }
    reader.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_little_endian() {
        let bytes = float_ply(&["x", "y", "z"], &sample_rows());
        let elements = read_ply(&bytes[..], None, 4096).unwrap();

        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].name, "vertex");
        assert_eq!(elements[0].count, 3);
        assert_eq!(column(&elements, "x"), vec![1.0, -4.5, 7.0]);
        assert_eq!(column(&elements, "y"), vec![2.0, 0.25, -8.0]);
        assert_eq!(column(&elements, "z"), vec![3.0, 6.0, 9.5]);

        println!("✓ Binary little-endian parse");
    }

    #[test]
    fn test_every_split_point() {
        let bytes = float_ply(&["x", "y", "z"], &sample_rows());
        let whole = read_ply(&bytes[..], None, bytes.len()).unwrap();

        for split in 0..=bytes.len() {
            let mut reader = PlyReader::new();
            reader.push(&bytes[..split]).unwrap();
            reader.push(&bytes[split..]).unwrap();
            let elements = reader.finish().unwrap();
            assert_eq!(elements, whole, "split at byte {}", split);
        }

        println!("✓ Identical result for all {} split points", bytes.len() + 1);
    }

    #[test]
    fn test_byte_by_byte() {
        let bytes = float_ply(&["x", "y", "z"], &sample_rows());
        let elements = parse_in_chunks(&bytes, 1).unwrap();
        assert_eq!(column(&elements, "z"), vec![3.0, 6.0, 9.5]);

        let elements = parse_in_chunks(&bytes, 7).unwrap();
        assert_eq!(column(&elements, "y"), vec![2.0, 0.25, -8.0]);

        println!("✓ Byte-sized and odd-sized chunks");
    }

    #[test]
    fn test_big_endian() {
        let bytes = float_ply_be(&["x", "y", "z"], &sample_rows());
        let mut reader = PlyReader::new();
        reader.push(&bytes).unwrap();
        assert_eq!(reader.format(), Some(PlyFormat::BinaryBigEndian));
        let elements = reader.finish().unwrap();

        assert_eq!(column(&elements, "x"), vec![1.0, -4.5, 7.0]);

        println!("✓ Binary big-endian parse");
    }

    #[test]
    fn test_ascii() {
        let text = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty uchar red\n\
                    end_header\n1.5 255\n-2 0\n";
        let elements = parse_in_chunks(text.as_bytes(), 5).unwrap();

        assert_eq!(column(&elements, "x"), vec![1.5, -2.0]);
        let red = elements[0].storage("red").unwrap();
        assert_eq!(red.scalar_type(), ScalarType::UChar);
        assert_eq!(red.get_f64(0), Some(255.0));
        assert_eq!(red.get_f64(1), Some(0.0));

        println!("✓ ASCII parse");
    }

    #[test]
    fn test_ascii_without_trailing_newline() {
        let text = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nend_header\n1\n2";
        let elements = parse_in_chunks(text.as_bytes(), 3).unwrap();
        assert_eq!(column(&elements, "x"), vec![1.0, 2.0]);

        println!("✓ ASCII last record without newline");
    }

    #[test]
    fn test_crlf_header() {
        let mut bytes =
            b"ply\r\nformat binary_little_endian 1.0\r\nelement vertex 1\r\nproperty float x\r\nend_header\r\n"
                .to_vec();
        bytes.extend_from_slice(&42.0f32.to_le_bytes());
        let elements = parse_in_chunks(&bytes, 2).unwrap();
        assert_eq!(column(&elements, "x"), vec![42.0]);

        println!("✓ CRLF header");
    }

    #[test]
    fn test_unwanted_properties_not_stored() {
        let bytes = float_ply(&["x", "y", "z"], &sample_rows());
        let elements = read_ply(&bytes[..], Some(&["x", "z"][..]), 16).unwrap();
        let vertex = &elements[0];

        assert!(vertex.has_property("y"));
        assert!(vertex.storage("y").is_none());
        // alignment survives skipping y
        assert_eq!(column(&elements, "z"), vec![3.0, 6.0, 9.5]);

        println!("✓ Unrequested properties walked but not stored");
    }

    #[test]
    fn test_list_property_skipped() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\n\
            element vertex 1\nproperty float x\n\
            element face 2\nproperty list uchar int vertex_indices\nproperty float w\n\
            end_header\n"
            .to_vec();
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        // face 0: three indices, face 1: none
        bytes.push(3);
        for i in [0i32, 1, 2] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&0.75f32.to_le_bytes());

        let elements = parse_in_chunks(&bytes, 3).unwrap();
        let face = &elements[1];
        assert!(matches!(
            face.property("vertex_indices").unwrap().kind,
            PropertyKind::List { .. }
        ));
        assert!(face.storage("vertex_indices").is_none());
        assert_eq!(face.storage("w").unwrap().to_f32_vec(), vec![0.5, 0.75]);

        println!("✓ List properties skipped with alignment intact");
    }

    #[test]
    fn test_missing_end_header() {
        let mut reader = PlyReader::new();
        reader
            .push(b"ply\nformat binary_little_endian 1.0\nelement vertex 1\n")
            .unwrap();
        assert!(matches!(reader.finish(), Err(PlyError::MissingEndHeader)));

        println!("✓ Missing end_header rejected");
    }

    #[test]
    fn test_truncated_body() {
        let bytes = float_ply(&["x", "y", "z"], &sample_rows());
        let truncated = &bytes[..bytes.len() - 2];
        match parse_in_chunks(truncated, 10) {
            Err(PlyError::UnexpectedEof {
                element,
                expected,
                read,
            }) => {
                assert_eq!(element, "vertex");
                assert_eq!(expected, 3);
                assert_eq!(read, 2);
            }
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }

        println!("✓ Truncated body rejected");
    }

    #[test]
    fn test_bad_magic() {
        let mut reader = PlyReader::new();
        assert!(matches!(reader.push(b"plx\n"), Err(PlyError::MissingMagic)));

        println!("✓ Bad magic rejected");
    }

    #[test]
    fn test_invalid_declarations() {
        let missing_name = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float\nend_header\n";
        assert!(matches!(
            parse_in_chunks(missing_name.as_bytes(), 64),
            Err(PlyError::InvalidHeader { line: 4, .. })
        ));

        let bad_type = "ply\nformat ascii 1.0\nelement vertex 1\nproperty quad x\nend_header\n";
        assert!(matches!(
            parse_in_chunks(bad_type.as_bytes(), 64),
            Err(PlyError::InvalidHeader { .. })
        ));

        let bad_format = "ply\nformat binary_middle_endian 1.0\nend_header\n";
        assert!(matches!(
            parse_in_chunks(bad_format.as_bytes(), 64),
            Err(PlyError::UnsupportedFormat(_))
        ));

        let bad_value = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nend_header\nabc\n";
        assert!(matches!(
            parse_in_chunks(bad_value.as_bytes(), 64),
            Err(PlyError::InvalidValue { .. })
        ));

        println!("✓ Malformed declarations rejected");
    }

    #[test]
    fn test_header_too_large() {
        let mut reader = PlyReader::new();
        reader.push(b"ply\n").unwrap();
        let comment = b"comment padding padding padding padding padding padding\n";
        let mut result = Ok(());
        for _ in 0..(MAX_HEADER_BYTES / comment.len() + 2) {
            result = reader.push(comment);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(PlyError::HeaderTooLarge { .. })));

        println!("✓ Oversized header rejected");
    }

    #[test]
    fn test_empty_element() {
        let bytes = float_ply(&["x"], &[]);
        let elements = read_ply(&bytes[..], None, 8).unwrap();
        assert_eq!(elements[0].count, 0);
        assert!(elements[0].storage("x").unwrap().is_empty());

        println!("✓ Zero-count element");
    }

    #[test]
    fn test_huge_declared_count() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 4611686018427387904\nproperty float x\nend_header\n".to_vec();
        bytes.extend_from_slice(&7.0f32.to_le_bytes());
        match parse_in_chunks(&bytes, 16) {
            Err(PlyError::UnexpectedEof {
                element,
                expected,
                read,
            }) => {
                assert_eq!(element, "vertex");
                assert_eq!(expected, 4611686018427387904);
                assert_eq!(read, 1);
            }
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }

        println!("✓ Oversized element count fails without preallocating");
    }

    #[test]
    fn test_end_header_inside_comment() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\ncomment exported before end_header\nelement vertex 1\nproperty float x\nend_header\n".to_vec();
        bytes.extend_from_slice(&7.0f32.to_le_bytes());

        for chunk in [1, 7, bytes.len()] {
            let elements = parse_in_chunks(&bytes, chunk).unwrap();
            assert_eq!(column(&elements, "x"), vec![7.0]);
        }

        println!("✓ end_header only recognized as a whole line");
    }
}
