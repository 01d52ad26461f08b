//! Packfile encoding (version 2, no deltas), the body of a receive-pack
//! request.
//!
//! `write_pack` produces what `git-receive-pack` expects after the command
//! list. `read_pack` decodes the same subset and is what a test server
//! uses to check what was pushed. Object ids and the trailer checksum go
//! through `gix-hash`.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;

use super::object::{ObjectId, ObjectKind, checksum};
use crate::error::{Error, Result};

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;

/// An object decoded from a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

/// Encode whole objects into a packfile with its SHA-1 trailer.
pub fn write_pack<'a, I>(objects: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (ObjectKind, &'a [u8])>,
    I::IntoIter: ExactSizeIterator,
{
    let objects = objects.into_iter();
    let count = u32::try_from(objects.len())
        .map_err(|_| Error::invalid("too many objects for one pack"))?;

    let mut out = Vec::new();
    out.extend_from_slice(PACK_SIGNATURE);
    out.extend_from_slice(&PACK_VERSION.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());

    for (kind, data) in objects {
        // type in bits 4-6 of the first byte, size as a little-endian varint
        let mut size = data.len();
        let mut byte = (kind.pack_type() << 4) | (size & 0x0f) as u8;
        size >>= 4;
        while size > 0 {
            out.push(byte | 0x80);
            byte = (size & 0x7f) as u8;
            size >>= 7;
        }
        out.push(byte);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        out.extend_from_slice(&encoder.finish()?);
    }

    let trailer = checksum(&out)?;
    out.extend_from_slice(trailer.as_bytes());
    Ok(out)
}

/// Decode a packfile made of whole (non-delta) objects.
pub fn read_pack(pack: &[u8]) -> Result<Vec<PackedObject>> {
    if pack.len() < 12 + 20 || &pack[..4] != PACK_SIGNATURE {
        return Err(Error::corrupt("not a packfile"));
    }
    let (body, trailer) = pack.split_at(pack.len() - 20);
    if checksum(body)?.as_bytes() != trailer {
        return Err(Error::corrupt("pack checksum mismatch"));
    }

    let version = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
    if version != PACK_VERSION {
        return Err(Error::corrupt(format!("unsupported pack version {}", version)));
    }
    let count = u32::from_be_bytes([body[8], body[9], body[10], body[11]]);

    let mut objects = Vec::with_capacity(count as usize);
    let mut pos = 12;
    for _ in 0..count {
        let first = *body
            .get(pos)
            .ok_or_else(|| Error::corrupt("truncated pack entry"))?;
        pos += 1;
        let kind = ObjectKind::from_pack_type((first >> 4) & 0x07)?;
        let mut size = (first & 0x0f) as usize;
        let mut shift = 4;
        let mut byte = first;
        while byte & 0x80 != 0 {
            byte = *body
                .get(pos)
                .ok_or_else(|| Error::corrupt("truncated pack entry size"))?;
            pos += 1;
            size |= ((byte & 0x7f) as usize) << shift;
            shift += 7;
        }

        let mut decoder = ZlibDecoder::new(&body[pos..]);
        let mut data = Vec::with_capacity(size);
        decoder
            .read_to_end(&mut data)
            .map_err(|e| Error::corrupt(format!("pack entry: {}", e)))?;
        if data.len() != size {
            return Err(Error::corrupt("pack entry size mismatch"));
        }
        pos += decoder.total_in() as usize;

        objects.push(PackedObject {
            id: ObjectId::hash(kind, &data)?,
            kind,
            data,
        });
    }

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_header_and_trailer() {
        let pack = write_pack([(ObjectKind::Blob, b"hello\n".as_slice())]).unwrap();
        assert_eq!(&pack[..4], b"PACK");
        assert_eq!(&pack[4..8], &2u32.to_be_bytes());
        assert_eq!(&pack[8..12], &1u32.to_be_bytes());
        // blob (3), size 6, no continuation
        assert_eq!(pack[12], 0x36);
    }

    #[test]
    fn test_large_object_size_varint() {
        let data = vec![b'x'; 1000];
        let pack = write_pack([(ObjectKind::Blob, data.as_slice())]).unwrap();
        // 1000 = 0b11_1110_1000: low nibble 8 with continuation, then 62
        assert_eq!(pack[12], 0x80 | 0x30 | 0x08);
        assert_eq!(pack[13], 62);

        let objects = read_pack(&pack).unwrap();
        assert_eq!(objects[0].data, data);
    }

    #[test]
    fn test_read_pack_restores_ids() {
        let pack = write_pack([
            (ObjectKind::Blob, b"hello\n".as_slice()),
            (ObjectKind::Tree, b"".as_slice()),
        ])
        .unwrap();

        let objects = read_pack(&pack).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(
            objects[0].id.to_hex(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
        assert_eq!(objects[1].kind, ObjectKind::Tree);
    }

    #[test]
    fn test_corrupt_pack_rejected() {
        let mut pack = write_pack([(ObjectKind::Blob, b"x".as_slice())]).unwrap();
        pack[14] ^= 0xff;
        assert!(read_pack(&pack).is_err());
        assert!(read_pack(b"nope").is_err());
    }
}
