//! Host ↔ device wire protocol.
//!
//! Every message is one length byte followed by a postcard payload. The
//! payload starts with the enum's varint discriminant, so the receiving side
//! knows the variant before it reads any field. The only unframed bytes on
//! the wire are periodic sample frames (32 bytes each, after a positive
//! [`AckSetPeriodicSampler`](DeviceToHostMessage::AckSetPeriodicSampler))
//! and the 10-byte end-of-stream marker that closes a stream.

use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

use crate::consts::{
    EOS_BYTE, EOS_LEN, FRAME_BYTES, FRAME_CAPACITY, MAX_DEVICE_MESSAGE_SIZE,
    MAX_INGRESS_MESSAGE_SIZE,
};
use crate::frame::SampleFrame;

/// Commands sent by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, MaxSize)]
pub enum HostToDeviceMessage {
    /// Start streaming with the given period [µs].
    SetPeriodicSampler {
        /// Sampling period [µs]; clamped up to the sampler floor.
        sampling_period: u32,
    },
    /// Stop streaming; answered with the end-of-stream marker.
    StopPeriodicSampler,
    /// Take one frame now and reply with it.
    ExecuteOneOffSampler,
}

/// Replies sent by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, MaxSize)]
pub enum DeviceToHostMessage {
    /// Reply to `SetPeriodicSampler`, sent before the sampler is armed.
    AckSetPeriodicSampler {
        /// `false` when the request was refused.
        ack: bool,
    },
    /// Reply to `ExecuteOneOffSampler`.
    OneOffSamplerData {
        /// Number of populated slots.
        populated: u8,
        /// Channel values; slots past `populated` are zero.
        values: [i32; FRAME_CAPACITY],
    },
}

impl DeviceToHostMessage {
    /// Build a one-off reply from a composed frame.
    pub fn one_off(frame: &SampleFrame) -> Self {
        Self::OneOffSamplerData {
            populated: frame.elements() as u8,
            values: *frame.values(),
        }
    }
}

const_assert!(HostToDeviceMessage::POSTCARD_MAX_SIZE <= MAX_INGRESS_MESSAGE_SIZE);
const_assert!(DeviceToHostMessage::POSTCARD_MAX_SIZE < MAX_DEVICE_MESSAGE_SIZE);

/// Framing and codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Length byte announced an empty payload.
    #[error("empty payload")]
    EmptyPayload,

    /// Payload does not fit the one-byte length prefix or the output buffer.
    #[error("payload of {len} bytes exceeds the {limit} byte limit")]
    TooLong {
        /// Encoded payload length.
        len: usize,
        /// Applicable limit.
        limit: usize,
    },

    /// Bytes left over after a complete message.
    #[error("{count} trailing bytes after message")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        count: usize,
    },

    /// Postcard rejected the payload.
    #[error("codec error: {0}")]
    Codec(#[from] postcard::Error),
}

/// Encode `msg` as `[len, payload…]` into `buf` and return the used prefix.
pub fn encode_framed<'a, T: Serialize>(
    msg: &T,
    buf: &'a mut [u8],
) -> Result<&'a [u8], ProtocolError> {
    if buf.is_empty() {
        return Err(ProtocolError::TooLong { len: 1, limit: 0 });
    }
    let limit = buf.len() - 1;
    let len = postcard::to_slice(msg, &mut buf[1..])
        .map_err(|e| match e {
            postcard::Error::SerializeBufferFull => ProtocolError::TooLong {
                len: limit + 1,
                limit,
            },
            other => ProtocolError::Codec(other),
        })?
        .len();
    if len > MAX_INGRESS_MESSAGE_SIZE {
        return Err(ProtocolError::TooLong {
            len,
            limit: MAX_INGRESS_MESSAGE_SIZE,
        });
    }
    buf[0] = len as u8;
    Ok(&buf[..=len])
}

/// Encode a host command, length byte included.
pub fn encode_host_message(msg: &HostToDeviceMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = [0u8; MAX_INGRESS_MESSAGE_SIZE + 1];
    Ok(encode_framed(msg, &mut buf)?.to_vec())
}

fn decode_exact<'de, T: Deserialize<'de>>(payload: &'de [u8]) -> Result<T, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyPayload);
    }
    let (msg, rest) = postcard::take_from_bytes(payload)?;
    if !rest.is_empty() {
        return Err(ProtocolError::TrailingBytes { count: rest.len() });
    }
    Ok(msg)
}

/// Decode a host command payload (length byte already stripped).
pub fn decode_host_payload(payload: &[u8]) -> Result<HostToDeviceMessage, ProtocolError> {
    decode_exact(payload)
}

/// Decode a device reply payload (length byte already stripped).
pub fn decode_device_payload(payload: &[u8]) -> Result<DeviceToHostMessage, ProtocolError> {
    decode_exact(payload)
}

/// Something the host decoded from the device byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A framed reply.
    Message(DeviceToHostMessage),
    /// One periodic sample frame.
    Frame(SampleFrame),
    /// The stream is closed; no further frames follow.
    EndOfStream,
}

/// Host-side reassembly of the device byte stream.
///
/// Starts in message mode. A positive set-sampler ack switches to streaming
/// mode, where the stream is cut into 32-byte frames until the end-of-stream
/// marker shows up at a frame boundary.
///
/// At a frame boundary, ten leading `0xFF` are taken as the marker unless
/// the buffer holds a whole number of frames. A frame whose first ten bytes
/// are `0xFF` is indistinguishable from the marker unless it sits in a
/// buffer of whole frames.
#[derive(Debug, Default)]
pub struct HostStreamDecoder {
    buf: Vec<u8>,
    streaming: bool,
}

impl HostStreamDecoder {
    /// Decoder in message mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` between a positive ack and the end-of-stream marker.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn starts_with_eos(&self) -> bool {
        self.buf.len() >= EOS_LEN && self.buf[..EOS_LEN].iter().all(|&b| b == EOS_BYTE)
    }

    fn take(&mut self, n: usize) -> Vec<u8> {
        self.buf.drain(..n).collect()
    }

    /// Decode the next complete event, if any.
    pub fn next_event(&mut self) -> Option<Result<HostEvent, ProtocolError>> {
        if self.streaming {
            // Frames arrive in whole units, so a remainder means something
            // other than frames sits behind the boundary.
            if self.starts_with_eos() && self.buf.len() % FRAME_BYTES != 0 {
                self.take(EOS_LEN);
                self.streaming = false;
                return Some(Ok(HostEvent::EndOfStream));
            }
            if self.buf.len() < FRAME_BYTES {
                return None;
            }
            let raw = self.take(FRAME_BYTES);
            let mut bytes = [0u8; FRAME_BYTES];
            bytes.copy_from_slice(&raw);
            return Some(Ok(HostEvent::Frame(SampleFrame::from_le_bytes(&bytes))));
        }

        // A reply payload never starts with 0xFF, so 0xFF 0xFF can only be
        // the marker answering a stop while idle.
        if self.buf.len() >= 2 && self.buf[0] == EOS_BYTE && self.buf[1] == EOS_BYTE {
            if self.starts_with_eos() {
                self.take(EOS_LEN);
                return Some(Ok(HostEvent::EndOfStream));
            }
            return None;
        }

        let len = *self.buf.first()? as usize;
        if self.buf.len() < 1 + len {
            return None;
        }
        let framed = self.take(1 + len);
        Some(decode_device_payload(&framed[1..]).map(|msg| {
            if msg == (DeviceToHostMessage::AckSetPeriodicSampler { ack: true }) {
                self.streaming = true;
            }
            HostEvent::Message(msg)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{EOS_MARKER, MAX_ACK_MESSAGE_SIZE};

    fn framed_reply(msg: &DeviceToHostMessage) -> Vec<u8> {
        let mut buf = [0u8; MAX_DEVICE_MESSAGE_SIZE];
        encode_framed(msg, &mut buf).unwrap().to_vec()
    }

    #[test]
    fn set_sampler_period_survives_the_wire() {
        for period in [40u32, 1000, 65_535, u32::MAX] {
            let bytes = encode_host_message(&HostToDeviceMessage::SetPeriodicSampler {
                sampling_period: period,
            })
            .unwrap();
            assert_eq!(bytes[0] as usize, bytes.len() - 1);
            assert_eq!(
                decode_host_payload(&bytes[1..]).unwrap(),
                HostToDeviceMessage::SetPeriodicSampler {
                    sampling_period: period
                }
            );
        }
    }

    #[test]
    fn unit_commands_are_one_byte() {
        let stop = encode_host_message(&HostToDeviceMessage::StopPeriodicSampler).unwrap();
        let once = encode_host_message(&HostToDeviceMessage::ExecuteOneOffSampler).unwrap();
        assert_eq!(stop, vec![1, 1]);
        assert_eq!(once, vec![1, 2]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode_host_payload(&[]), Err(ProtocolError::EmptyPayload));
        assert!(matches!(
            decode_host_payload(&[9]),
            Err(ProtocolError::Codec(_))
        ));
        assert_eq!(
            decode_host_payload(&[1, 0, 0]),
            Err(ProtocolError::TrailingBytes { count: 2 })
        );
    }

    #[test]
    fn ack_fits_ack_budget() {
        let bytes = framed_reply(&DeviceToHostMessage::AckSetPeriodicSampler { ack: true });
        assert!(bytes.len() <= MAX_ACK_MESSAGE_SIZE);
    }

    #[test]
    fn encode_reports_small_buffer() {
        let mut buf = [0u8; 4];
        let msg = DeviceToHostMessage::OneOffSamplerData {
            populated: 8,
            values: [i32::MIN; FRAME_CAPACITY],
        };
        assert!(matches!(
            encode_framed(&msg, &mut buf),
            Err(ProtocolError::TooLong { .. })
        ));
    }

    #[test]
    fn decoder_switches_to_streaming_after_positive_ack() {
        let mut dec = HostStreamDecoder::new();
        dec.push(&framed_reply(&DeviceToHostMessage::AckSetPeriodicSampler {
            ack: true,
        }));

        let mut frame = SampleFrame::new();
        frame.push(-1);
        frame.push(42);
        dec.push(&frame.to_le_bytes());
        dec.push(&frame.to_le_bytes());
        dec.push(&EOS_MARKER);

        assert_eq!(
            dec.next_event(),
            Some(Ok(HostEvent::Message(
                DeviceToHostMessage::AckSetPeriodicSampler { ack: true }
            )))
        );
        assert!(dec.is_streaming());
        for _ in 0..2 {
            match dec.next_event() {
                Some(Ok(HostEvent::Frame(f))) => assert_eq!(&f.values()[..2], &[-1, 42]),
                other => panic!("expected frame, got {other:?}"),
            }
        }
        assert_eq!(dec.next_event(), Some(Ok(HostEvent::EndOfStream)));
        assert!(!dec.is_streaming());
        assert_eq!(dec.next_event(), None);
    }

    #[test]
    fn negative_ack_stays_in_message_mode() {
        let mut dec = HostStreamDecoder::new();
        dec.push(&framed_reply(&DeviceToHostMessage::AckSetPeriodicSampler {
            ack: false,
        }));
        assert!(matches!(dec.next_event(), Some(Ok(HostEvent::Message(_)))));
        assert!(!dec.is_streaming());
    }

    #[test]
    fn decoder_waits_for_partial_input() {
        let mut dec = HostStreamDecoder::new();
        let reply = framed_reply(&DeviceToHostMessage::one_off(&SampleFrame::from_parts(
            [3, 4, 0, 0, 0, 0, 0, 0],
            2,
        )));
        dec.push(&reply[..reply.len() - 1]);
        assert_eq!(dec.next_event(), None);
        dec.push(&reply[reply.len() - 1..]);
        match dec.next_event() {
            Some(Ok(HostEvent::Message(DeviceToHostMessage::OneOffSamplerData {
                populated,
                values,
            }))) => {
                assert_eq!(populated, 2);
                assert_eq!(values, [3, 4, 0, 0, 0, 0, 0, 0]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn marker_followed_by_reply_in_one_read() {
        let mut dec = HostStreamDecoder::new();
        dec.push(&framed_reply(&DeviceToHostMessage::AckSetPeriodicSampler {
            ack: true,
        }));
        let reply = DeviceToHostMessage::one_off(&SampleFrame::from_parts([i32::MIN; 8], 8));
        let mut tail = EOS_MARKER.to_vec();
        tail.extend_from_slice(&framed_reply(&reply));
        assert!(tail.len() >= FRAME_BYTES);
        dec.push(&tail);

        assert!(matches!(dec.next_event(), Some(Ok(HostEvent::Message(_)))));
        assert_eq!(dec.next_event(), Some(Ok(HostEvent::EndOfStream)));
        assert!(!dec.is_streaming());
        assert_eq!(dec.next_event(), Some(Ok(HostEvent::Message(reply))));
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn marker_in_message_mode_is_end_of_stream() {
        let mut dec = HostStreamDecoder::new();
        dec.push(&EOS_MARKER[..4]);
        assert_eq!(dec.next_event(), None);
        dec.push(&EOS_MARKER[4..]);
        assert_eq!(dec.next_event(), Some(Ok(HostEvent::EndOfStream)));
        assert_eq!(dec.buffered(), 0);
    }
}
