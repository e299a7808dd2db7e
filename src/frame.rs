use crate::{
    config::Config,
    error::{MuxError, Result},
    flags::Flags,
};
use bytes::Bytes;

/// Wire header: flags (1) + channel_id (4) + payload_length (2) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Fragmentation boundary: no frame carries more than this many payload
/// bytes. Fixed by the protocol, not negotiated.
pub const MAX_PAYLOAD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: Flags,
    pub channel_id: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(flags: Flags, channel_id: u32, payload: Bytes) -> Self {
        Self {
            flags,
            channel_id,
            payload,
        }
    }

    pub fn new_syn(channel_id: u32) -> Self {
        Self::new(Flags::Syn, channel_id, Bytes::new())
    }

    pub fn new_rst(channel_id: u32) -> Self {
        Self::new(Flags::Rst, channel_id, Bytes::new())
    }

    pub fn new_data(channel_id: u32, payload: Bytes) -> Self {
        Self::new(Flags::Data, channel_id, payload)
    }

    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn validate(&self, config: &Config) -> Result<()> {
        // Channel id 0 is never allocated by either role.
        if self.channel_id == 0 {
            return Err(MuxError::MalformedFrame("zero channel id".to_string()));
        }

        if self.payload.len() > config.max_payload_size {
            return Err(MuxError::MalformedFrame(format!(
                "payload of {} bytes exceeds maximum of {}",
                self.payload.len(),
                config.max_payload_size
            )));
        }

        if !self.flags.can_carry_data() && !self.payload.is_empty() {
            return Err(MuxError::MalformedFrame(
                "RST frames cannot carry payload".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn test_frame_creation() {
        let payload = Bytes::from("hello");
        let frame = Frame::new(Flags::Data, 123, payload.clone());

        assert_eq!(frame.flags, Flags::Data);
        assert_eq!(frame.channel_id, 123);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_frame_constructors() {
        let syn = Frame::new_syn(123);
        assert_eq!(syn.flags, Flags::Syn);
        assert_eq!(syn.channel_id, 123);
        assert!(syn.is_empty());

        let rst = Frame::new_rst(123);
        assert_eq!(rst.flags, Flags::Rst);
        assert_eq!(rst.channel_id, 123);
        assert!(rst.is_empty());

        let payload = Bytes::from("test");
        let data = Frame::new_data(123, payload.clone());
        assert_eq!(data.flags, Flags::Data);
        assert_eq!(data.channel_id, 123);
        assert_eq!(data.payload, payload);
    }

    #[test]
    fn test_frame_size_calculation() {
        let empty = Frame::new_syn(123);
        assert_eq!(empty.total_size(), HEADER_SIZE);
        assert_eq!(empty.payload_len(), 0);
        assert!(empty.is_empty());

        let data = Frame::new_data(123, Bytes::from("hello"));
        assert_eq!(data.total_size(), HEADER_SIZE + 5);
        assert_eq!(data.payload_len(), 5);
        assert!(!data.is_empty());
    }

    #[test]
    fn test_frame_validation() {
        let config = Config::default();

        assert!(Frame::new_syn(123).validate(&config).is_ok());
        assert!(Frame::new_rst(123).validate(&config).is_ok());
        assert!(
            Frame::new_data(123, Bytes::from("data"))
                .validate(&config)
                .is_ok()
        );

        // SYN may carry payload.
        let syn_with_data = Frame::new(Flags::Syn, 123, Bytes::from("early"));
        assert!(syn_with_data.validate(&config).is_ok());

        // RST may not.
        let rst_with_data = Frame::new(Flags::Rst, 123, Bytes::from("late"));
        assert!(rst_with_data.validate(&config).is_err());

        // Channel id 0 is never valid.
        let zero_id = Frame::new_data(0, Bytes::from("data"));
        assert!(zero_id.validate(&config).is_err());
    }

    #[test]
    fn test_frame_payload_size_validation() {
        let config = Config::default();

        let max = Frame::new_data(123, Bytes::from(vec![0u8; MAX_PAYLOAD]));
        assert!(max.validate(&config).is_ok());

        let oversized = Frame::new_data(123, Bytes::from(vec![0u8; MAX_PAYLOAD + 1]));
        assert!(oversized.validate(&config).is_err());
    }
}
