use risa_core::{Result, RisaError};

/// Header words preceding the payload: `module_id: u16`,
/// `projection_index: u32`, `sample_offset: u32`, host-native endianness.
pub const HEADER_WORDS: usize = 5;

/// Bytes occupied by the packet header.
pub const HEADER_BYTES: usize = HEADER_WORDS * 2;

/// Fixed-layout header of a detector-module packet.
///
/// There is no negotiation; packets are decoded by layout alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub module_id: u16,
    /// Global projection counter since run start.
    pub projection_index: u32,
    /// Sample offset within this projection's module stripe.
    pub sample_offset: u32,
}

impl PacketHeader {
    pub fn decode(words: &[u16]) -> Result<Self> {
        if words.len() < HEADER_WORDS {
            return Err(RisaError::Receiver(format!(
                "packet too short for header: {} words",
                words.len()
            )));
        }
        let bytes: &[u8] = bytemuck::cast_slice(&words[..HEADER_WORDS]);
        Ok(Self {
            module_id: u16::from_ne_bytes([bytes[0], bytes[1]]),
            projection_index: u32::from_ne_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            sample_offset: u32::from_ne_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        })
    }

    pub fn encode(&self, words: &mut [u16]) {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut words[..HEADER_WORDS]);
        bytes[0..2].copy_from_slice(&self.module_id.to_ne_bytes());
        bytes[2..6].copy_from_slice(&self.projection_index.to_ne_bytes());
        bytes[6..10].copy_from_slice(&self.sample_offset.to_ne_bytes());
    }
}

/// Borrowed view of a decoded packet.
#[derive(Debug)]
pub struct PacketView<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u16],
}

/// Decode a received datagram (as aligned `u16` words).
pub fn parse(words: &[u16]) -> Result<PacketView<'_>> {
    let header = PacketHeader::decode(words)?;
    Ok(PacketView {
        header,
        payload: &words[HEADER_WORDS..],
    })
}

/// Build a datagram for replay tools and tests.
pub fn build(header: PacketHeader, payload: &[u16]) -> Vec<u16> {
    let mut words = vec![0u16; HEADER_WORDS + payload.len()];
    header.encode(&mut words);
    words[HEADER_WORDS..].copy_from_slice(payload);
    words
}
