//! Single-field Extensions (types 7 and 8)

use bytes::{BufMut, BytesMut};

use super::ensure_len;
use crate::FhError;

pub(crate) fn write_eaxc_mask(buf: &mut BytesMut, mask: u16) -> Result<(), FhError> {
    buf.put_u16(mask);
    Ok(())
}

pub(crate) fn parse_eaxc_mask(body: &[u8]) -> Result<u16, FhError> {
    ensure_len(body, 2, "extension 7")?;
    Ok(u16::from_be_bytes([body[0], body[1]]))
}

pub(crate) fn write_regularization(buf: &mut BytesMut, factor: i16) -> Result<(), FhError> {
    buf.put_i16(factor);
    Ok(())
}

pub(crate) fn parse_regularization(body: &[u8]) -> Result<i16, FhError> {
    ensure_len(body, 2, "extension 8")?;
    Ok(i16::from_be_bytes([body[0], body[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_regularization_sign() {
        let mut buf = BytesMut::new();
        write_regularization(&mut buf, -2).unwrap();
        assert_eq!(buf.as_ref(), &[0xff, 0xfe]);
        assert_eq!(parse_regularization(&buf).unwrap(), -2);
    }
    
    #[test]
    fn test_short_eaxc_mask() {
        assert!(parse_eaxc_mask(&[0x01]).is_err());
    }
}
