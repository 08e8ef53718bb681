//! Кадр облегчённого (датаграммного) канала.
//!
//! ```text
//! [prefix][marker:2][topic_len:2 BE][sep:2][topic][payload]
//! ```
//!
//! Префикс: один байт `size + 1`, если тело короче 254 байт, иначе три
//! байта `0x01, hi, lo` от `size + 3`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fabric_error::ProtocolError;

/// Фиксированный маркер типа кадра.
pub const FRAME_MARKER: [u8; 2] = [0x0C, 0x60];
/// Разделитель между заголовком и топиком.
pub const FRAME_SEPARATOR: [u8; 2] = [b' ', b' '];
/// Тело от этой длины кодируется расширенным префиксом.
pub const EXTENDED_PREFIX_THRESHOLD: usize = 254;
/// Маркер расширенного префикса.
const EXTENDED_PREFIX_MARKER: u8 = 0x01;
/// Заголовок тела: маркер + длина топика + разделитель.
pub const BODY_HEADER_LEN: usize = 6;
/// Наибольший заголовок кадра (с расширенным префиксом).
pub const MAX_HEADER_LEN: usize = BODY_HEADER_LEN + 3;

/// Кодирует топик и полезную нагрузку в кадр.
pub fn encode(
    topic: &str,
    payload: &[u8],
) -> Result<Bytes, ProtocolError> {
    let topic_len = u16::try_from(topic.len())
        .map_err(|_| ProtocolError::FrameTooLong { len: topic.len() })?;
    let size = BODY_HEADER_LEN + topic.len() + payload.len();

    let mut buf = BytesMut::with_capacity(size + 3);
    if size < EXTENDED_PREFIX_THRESHOLD {
        buf.put_u8((size + 1) as u8);
    } else {
        let total =
            u16::try_from(size + 3).map_err(|_| ProtocolError::FrameTooLong { len: size + 3 })?;
        buf.put_u8(EXTENDED_PREFIX_MARKER);
        buf.put_u16(total);
    }

    buf.put_slice(&FRAME_MARKER);
    buf.put_u16(topic_len);
    buf.put_slice(&FRAME_SEPARATOR);
    buf.put_slice(topic.as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Разбирает кадр обратно в `(topic, payload)`.
pub fn decode(frame: &[u8]) -> Result<(String, Bytes), ProtocolError> {
    let mut buf = frame;
    if buf.is_empty() {
        return Err(ProtocolError::FrameTooShort { len: 0 });
    }

    let declared = if buf[0] == EXTENDED_PREFIX_MARKER {
        if buf.len() < 3 {
            return Err(ProtocolError::FrameTooShort { len: frame.len() });
        }
        buf.advance(1);
        buf.get_u16() as usize
    } else {
        buf.get_u8() as usize
    };
    if declared != frame.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }

    if buf.remaining() < BODY_HEADER_LEN {
        return Err(ProtocolError::FrameTooShort { len: frame.len() });
    }
    let marker = [buf.get_u8(), buf.get_u8()];
    if marker != FRAME_MARKER {
        return Err(ProtocolError::BadMarker { found: marker });
    }
    let topic_len = buf.get_u16() as usize;
    let separator = [buf.get_u8(), buf.get_u8()];
    if separator != FRAME_SEPARATOR {
        return Err(ProtocolError::BadSeparator { found: separator });
    }
    if buf.remaining() < topic_len {
        return Err(ProtocolError::FrameTooShort { len: frame.len() });
    }

    let topic = std::str::from_utf8(&buf[..topic_len])
        .map_err(|_| ProtocolError::InvalidTopic)?
        .to_string();
    buf.advance(topic_len);
    Ok((topic, Bytes::copy_from_slice(buf)))
}
