//! 와이어 패킷 정의
//!
//! - 고정 12바이트 헤더 + 최대 239바이트 payload
//! - 전송 직전 251바이트 프레임으로 0 패딩

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::message::{NackCode, Opcode};
use crate::{Error, Result, FRAME_LEN, HEADER_LEN, MAX_PAYLOAD};

/// FTP 패킷 (전송 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 시퀀스 번호
    pub seq: u16,

    /// 세션 ID
    pub session: u8,

    /// opcode
    pub opcode: Opcode,

    /// 선언된 크기 (payload 길이 이상, 239 이하)
    pub size: u8,

    /// 응답이 가리키는 요청 opcode
    pub req_opcode: Opcode,

    /// 버스트 마지막 패킷 여부
    pub burst_complete: bool,

    /// 예약 바이트
    pub padding: u8,

    /// 파일/디렉터리 오프셋
    pub offset: u32,

    /// payload
    pub payload: Bytes,
}

impl Packet {
    /// 요청 패킷 생성 (seq/session은 전송 시 세션이 채움)
    pub fn request(opcode: Opcode, size: u8, offset: u32, payload: Bytes) -> Self {
        Self {
            seq: 0,
            session: 0,
            opcode,
            size,
            req_opcode: Opcode::None,
            burst_complete: false,
            padding: 0,
            offset,
            payload,
        }
    }

    /// payload 크기를 선언 크기로 쓰는 요청
    pub fn with_payload(opcode: Opcode, offset: u32, payload: Bytes) -> Self {
        let size = payload.len().min(MAX_PAYLOAD) as u8;
        Self::request(opcode, size, offset, payload)
    }

    /// 요청에 대한 ACK 응답
    pub fn ack(request: &Packet, offset: u32, payload: Bytes) -> Self {
        Self {
            seq: request.seq.wrapping_add(1),
            session: request.session,
            opcode: Opcode::Ack,
            size: payload.len().min(MAX_PAYLOAD) as u8,
            req_opcode: request.opcode,
            burst_complete: false,
            padding: 0,
            offset,
            payload,
        }
    }

    /// 요청에 대한 NACK 응답
    pub fn nack(request: &Packet, code: NackCode) -> Self {
        let payload = Bytes::from(code.to_payload());
        Self {
            seq: request.seq.wrapping_add(1),
            session: request.session,
            opcode: Opcode::Nack,
            size: payload.len() as u8,
            req_opcode: request.opcode,
            burst_complete: false,
            padding: 0,
            offset: request.offset,
            payload,
        }
    }

    /// NACK이면 에러 코드 반환
    pub fn nack_code(&self) -> Option<NackCode> {
        (self.opcode == Opcode::Nack).then(|| NackCode::from_payload(&self.payload))
    }

    /// payload가 선언 크기로 잘린 데이터 끝 오프셋
    pub fn end_offset(&self) -> u64 {
        self.offset as u64 + self.payload.len() as u64
    }

    /// 헤더 + payload 인코딩 (패딩 없음)
    pub fn encode(&self) -> BytesMut {
        let payload_len = self.payload.len().min(MAX_PAYLOAD);
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len);
        buf.put_u16_le(self.seq);
        buf.put_u8(self.session);
        buf.put_u8(self.opcode as u8);
        buf.put_u8(self.size);
        buf.put_u8(self.req_opcode as u8);
        buf.put_u8(self.burst_complete as u8);
        buf.put_u8(self.padding);
        buf.put_u32_le(self.offset);
        buf.put_slice(&self.payload[..payload_len]);
        buf
    }

    /// 전송용 251바이트 프레임 (0 패딩)
    pub fn to_frame(&self) -> Bytes {
        let mut buf = self.encode();
        buf.resize(FRAME_LEN, 0);
        buf.freeze()
    }

    /// 바이트에서 패킷 복원
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::malformed(format!(
                "헤더 길이 부족: {} < {}",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let mut header = &bytes[..HEADER_LEN];
        let seq = header.get_u16_le();
        let session = header.get_u8();
        let opcode_raw = header.get_u8();
        let size = header.get_u8();
        let req_opcode_raw = header.get_u8();
        let burst_complete = header.get_u8() != 0;
        let padding = header.get_u8();
        let offset = header.get_u32_le();

        let opcode = Opcode::from_u8(opcode_raw)
            .ok_or_else(|| Error::malformed(format!("알 수 없는 opcode: {}", opcode_raw)))?;
        let req_opcode = Opcode::from_u8(req_opcode_raw).ok_or_else(|| {
            Error::malformed(format!("알 수 없는 req_opcode: {}", req_opcode_raw))
        })?;

        let declared = size as usize;
        if declared > MAX_PAYLOAD {
            return Err(Error::malformed(format!(
                "선언 크기 초과: {} > {}",
                declared, MAX_PAYLOAD
            )));
        }
        let available = bytes.len() - HEADER_LEN;
        if declared > available {
            return Err(Error::malformed(format!(
                "payload 부족: declared {}, available {}",
                declared, available
            )));
        }

        let payload = Bytes::copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + declared]);

        Ok(Self {
            seq,
            session,
            opcode,
            size,
            req_opcode,
            burst_complete,
            padding,
            offset,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: &[u8]) -> Packet {
        Packet {
            seq: 513,
            session: 7,
            opcode: Opcode::Ack,
            size: payload.len() as u8,
            req_opcode: Opcode::BurstReadFile,
            burst_complete: true,
            padding: 0,
            offset: 0xDEAD_BEEF,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn test_packet_roundtrip() {
        for len in [0usize, 1, 100, MAX_PAYLOAD] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let packet = sample(&data);

            let encoded = packet.encode();
            assert_eq!(encoded.len(), HEADER_LEN + len);
            assert_eq!(Packet::decode(&encoded).unwrap(), packet);
        }
    }

    #[test]
    fn test_header_layout() {
        let packet = sample(b"abc");
        let encoded = packet.encode();

        assert_eq!(&encoded[0..2], &513u16.to_le_bytes());
        assert_eq!(encoded[2], 7);
        assert_eq!(encoded[3], Opcode::Ack as u8);
        assert_eq!(encoded[4], 3);
        assert_eq!(encoded[5], Opcode::BurstReadFile as u8);
        assert_eq!(encoded[6], 1);
        assert_eq!(encoded[7], 0);
        assert_eq!(&encoded[8..12], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(&encoded[12..], b"abc");
    }

    #[test]
    fn test_frame_is_padded() {
        let frame = sample(b"xyz").to_frame();
        assert_eq!(frame.len(), FRAME_LEN);
        assert!(frame[HEADER_LEN + 3..].iter().all(|&b| b == 0));

        // 패딩된 프레임도 선언 크기만큼만 payload로 복원
        let restored = Packet::decode(&frame).unwrap();
        assert_eq!(restored.payload.as_ref(), b"xyz");
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        let mut encoded = sample(b"hello").encode();
        encoded[4] = 10;
        assert!(matches!(
            Packet::decode(&encoded),
            Err(Error::MalformedPacket { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_declaration() {
        let mut frame = sample(b"").to_frame().to_vec();
        frame[4] = 240;
        assert!(Packet::decode(&frame).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_header() {
        assert!(Packet::decode(&[0u8; 11]).is_err());
    }

    #[test]
    fn test_nack_reply() {
        let request = Packet::with_payload(Opcode::OpenFileRO, 0, Bytes::from_static(b"/x"));
        let reply = Packet::nack(&request, NackCode::FileNotFound);

        assert_eq!(reply.seq, 1);
        assert_eq!(reply.req_opcode, Opcode::OpenFileRO);
        assert_eq!(reply.nack_code(), Some(NackCode::FileNotFound));
        assert_eq!(Packet::ack(&request, 0, Bytes::new()).nack_code(), None);
    }
}
