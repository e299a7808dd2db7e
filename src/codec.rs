use crate::{
    config::Config,
    error::{MuxError, Result},
    flags::Flags,
    frame::{Frame, HEADER_SIZE},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frame codec for the 7-byte little-endian wire header.
///
/// Layout: flags (u8) | channel_id (u32 LE) | payload_length (u16 LE),
/// followed by exactly payload_length bytes. Decode failures are fatal to
/// the session.
#[derive(Debug, Clone)]
pub struct Codec {
    config: Config,
}

impl Codec {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn decode_header(src: &[u8]) -> Result<(Flags, u32, u16)> {
        let flags = Flags::from_byte(src[0])?;
        let channel_id = u32::from_le_bytes(src[1..5].try_into().unwrap());
        let payload_len = u16::from_le_bytes(src[5..7].try_into().unwrap());
        Ok((flags, channel_id, payload_len))
    }

    fn encode_header(dst: &mut BytesMut, flags: Flags, channel_id: u32, payload_len: u16) {
        dst.put_u8(flags.to_byte());
        dst.put_u32_le(channel_id);
        dst.put_u16_le(payload_len);
    }
}

impl Decoder for Codec {
    type Item = Frame;
    type Error = MuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Header fields are validated before the payload is buffered so an
        // oversized or garbage length can never grow the read buffer.
        let (flags, channel_id, payload_len) = Self::decode_header(&src[..HEADER_SIZE])?;

        if payload_len as usize > self.config.max_payload_size {
            return Err(MuxError::MalformedFrame(format!(
                "payload of {payload_len} bytes exceeds maximum of {}",
                self.config.max_payload_size
            )));
        }

        if channel_id == 0 {
            return Err(MuxError::MalformedFrame("zero channel id".to_string()));
        }

        let total = HEADER_SIZE + payload_len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(payload_len as usize).freeze();

        // RST payloads are ignored.
        let payload = match flags {
            Flags::Rst => Bytes::new(),
            _ => payload,
        };

        Ok(Some(Frame::new(flags, channel_id, payload)))
    }
}

impl Encoder<Frame> for Codec {
    type Error = MuxError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        frame.validate(&self.config)?;

        dst.reserve(frame.total_size());
        Self::encode_header(dst, frame.flags, frame.channel_id, frame.payload.len() as u16);
        dst.put_slice(&frame.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn test_codec() -> Codec {
        Codec::new(Config::default())
    }

    #[test]
    fn test_codec_round_trip_syn() {
        let mut codec = test_codec();
        let frame = Frame::new_syn(123);

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_codec_round_trip_rst() {
        let mut codec = test_codec();
        let frame = Frame::new_rst(123);

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_codec_round_trip_data() {
        let mut codec = test_codec();
        let frame = Frame::new_data(123, Bytes::from("hello world"));

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_wire_layout() {
        let mut codec = test_codec();
        let frame = Frame::new_data(0x01020304, Bytes::from_static(b"ab"));

        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_SIZE + 2);
        assert_eq!(buf[0], 0); // data frame: no flag bits
        assert_eq!(&buf[1..5], &[0x04, 0x03, 0x02, 0x01]); // channel id LE
        assert_eq!(&buf[5..7], &[0x02, 0x00]); // payload length LE
        assert_eq!(&buf[7..], b"ab");
    }

    #[test]
    fn test_decode_partial_header() {
        let mut codec = test_codec();
        let frame = Frame::new_syn(123);

        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        let mut partial = BytesMut::from(&buf[..4]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_decode_partial_payload() {
        let mut codec = test_codec();
        let frame = Frame::new_data(123, Bytes::from("hello world"));

        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        let mut partial = BytesMut::from(&buf[..HEADER_SIZE + 5]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        // Nothing consumed until the full frame is buffered.
        assert_eq!(partial.len(), HEADER_SIZE + 5);
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut codec = test_codec();
        let frame1 = Frame::new_syn(123);
        let frame2 = Frame::new_data(123, Bytes::from("payload"));
        let frame3 = Frame::new_rst(456);

        let mut buf = BytesMut::new();
        codec.encode(frame1.clone(), &mut buf).unwrap();
        codec.encode(frame2.clone(), &mut buf).unwrap();
        codec.encode(frame3.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), frame1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), frame2);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), frame3);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_oversized_payload() {
        let mut codec = test_codec();

        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u32_le(123);
        buf.put_u16_le(1025); // one past the fragmentation boundary

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_unknown_flag_bits() {
        let mut codec = test_codec();

        let mut buf = BytesMut::new();
        buf.put_u8(0b100); // reserved bit
        buf.put_u32_le(123);
        buf.put_u16_le(0);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_zero_channel_id() {
        let mut codec = test_codec();

        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u32_le(0);
        buf.put_u16_le(0);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_rst_payload_ignored() {
        let mut codec = test_codec();

        let mut buf = BytesMut::new();
        buf.put_u8(Flags::RST);
        buf.put_u32_le(123);
        buf.put_u16_le(4);
        buf.put_slice(b"junk");

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.flags, Flags::Rst);
        assert_eq!(frame.channel_id, 123);
        assert!(frame.payload.is_empty());
        // The junk payload is consumed off the wire.
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_oversized_payload() {
        let mut codec = test_codec();
        let frame = Frame::new_data(123, Bytes::from(vec![0u8; 2048]));

        let mut buf = BytesMut::new();
        assert!(codec.encode(frame, &mut buf).is_err());
    }

    #[test]
    fn test_decode_respects_configured_maximum() {
        let config = crate::ConfigBuilder::new()
            .max_payload_size(16)
            .build()
            .unwrap();
        let mut codec = Codec::new(config);

        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u32_le(123);
        buf.put_u16_le(17);
        buf.put_slice(&[0u8; 17]);

        assert!(codec.decode(&mut buf).is_err());
    }
}
