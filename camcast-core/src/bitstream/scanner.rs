//! Annex-B bitstream scanning
//!
//! Stateless helpers over a byte span: locate start-code delimited NAL units,
//! classify them and strip leading start codes. Nothing here allocates; every
//! result borrows from the scanned buffer.

use std::ops::Range;

use crate::types::NalType;

/// One NAL unit located inside an Annex-B buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// Type from the NAL header
    pub nal_type: NalType,
    /// Offset of the start code in the scanned buffer
    pub offset: usize,
    /// 3 or 4
    pub start_code_len: usize,
    /// NAL bytes including the header, excluding the start code
    pub payload: &'a [u8],
}

impl<'a> NalUnit<'a> {
    /// Range of the payload in the scanned buffer
    pub fn payload_range(&self) -> Range<usize> {
        let start = self.offset + self.start_code_len;
        start..start + self.payload.len()
    }

    /// Range covering start code and payload
    pub fn span(&self) -> Range<usize> {
        self.offset..self.payload_range().end
    }

    /// NAL header byte
    pub fn header(&self) -> u8 {
        self.payload[0]
    }

    /// `nal_ref_idc` (2 bits)
    pub fn ref_idc(&self) -> u8 {
        (self.header() >> 5) & 0x03
    }
}

/// Find the next start code at or after `from`
///
/// Returns the offset of the first zero byte and the code length. At a given
/// offset the 4-byte form `00 00 00 01` wins over the 3-byte `00 00 01`
/// embedded in it.
pub fn find_start_code(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 {
            match buf[i + 2] {
                1 => return Some((i, 3)),
                0 if buf.get(i + 3) == Some(&1) => return Some((i, 4)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Length of the start code at the very beginning of `buf` (4, 3 or 0)
pub fn start_code_len(buf: &[u8]) -> usize {
    if buf.starts_with(&[0, 0, 0, 1]) {
        4
    } else if buf.starts_with(&[0, 0, 1]) {
        3
    } else {
        0
    }
}

/// `buf` without its leading start code, if it has one
pub fn strip_start_code(buf: &[u8]) -> &[u8] {
    &buf[start_code_len(buf)..]
}

/// Iterate over the NAL units of an Annex-B buffer
pub fn scan_nal_units(buf: &[u8]) -> NalUnits<'_> {
    NalUnits {
        buf,
        next: find_start_code(buf, 0),
    }
}

/// Type of the first NAL unit in `buf`
pub fn first_nal_type(buf: &[u8]) -> Option<NalType> {
    scan_nal_units(buf).next().map(|nal| nal.nal_type)
}

/// Whether any NAL unit in `buf` has the given type
pub fn contains_nal_type(buf: &[u8], nal_type: NalType) -> bool {
    find_nal(buf, nal_type).is_some()
}

/// First NAL unit of the given type
pub fn find_nal(buf: &[u8], nal_type: NalType) -> Option<NalUnit<'_>> {
    scan_nal_units(buf).find(|nal| nal.nal_type == nal_type)
}

/// Iterator returned by [`scan_nal_units`]
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    buf: &'a [u8],
    next: Option<(usize, usize)>,
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (offset, code_len) = self.next?;
            let start = offset + code_len;
            self.next = find_start_code(self.buf, start);
            let end = self.next.map(|(pos, _)| pos).unwrap_or(self.buf.len());

            // Back-to-back start codes carry no header byte
            if end <= start {
                continue;
            }

            let payload = &self.buf[start..end];
            return Some(NalUnit {
                nal_type: NalType::from_header(payload[0]),
                offset,
                start_code_len: code_len,
                payload,
            });
        }
    }
}

impl std::iter::FusedIterator for NalUnits<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    const AU: &[u8] = &[
        0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1E, // SPS
        0, 0, 1, 0x68, 0xEE, 0x3C, // PPS (3-byte code)
        0, 0, 0, 1, 0x65, 0x88, 0x84, // IDR, runs to the end
    ];

    #[test]
    fn test_scan_partitions_buffer() {
        let units: Vec<_> = scan_nal_units(AU).collect();
        assert_eq!(units.len(), 3);

        let types: Vec<_> = units.iter().map(|n| n.nal_type).collect();
        assert_eq!(types, vec![NalType::Sps, NalType::Pps, NalType::Idr]);

        // No gaps, no overlaps, last unit reaches the end
        assert_eq!(units[0].span().start, 0);
        for pair in units.windows(2) {
            assert_eq!(pair[0].span().end, pair[1].span().start);
        }
        assert_eq!(units[2].span().end, AU.len());
    }

    #[test]
    fn test_four_byte_code_wins() {
        assert_eq!(find_start_code(AU, 0), Some((0, 4)));
        assert_eq!(find_start_code(AU, 1), Some((1, 3)));
        assert_eq!(find_start_code(AU, 8), Some((8, 3)));
    }

    #[test]
    fn test_leading_garbage_is_not_a_unit() {
        let buf = [0xAB, 0xCD, 0, 0, 1, 0x41, 0x9A];
        let units: Vec<_> = scan_nal_units(&buf).collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].offset, 2);
        assert_eq!(units[0].payload, &[0x41, 0x9A]);
    }

    #[test]
    fn test_no_start_code() {
        assert_eq!(scan_nal_units(&[0x65, 0x01, 0x02]).count(), 0);
        assert_eq!(first_nal_type(&[]), None);
    }

    #[test]
    fn test_strip_start_code() {
        assert_eq!(strip_start_code(&[0, 0, 0, 1, 0x65]), &[0x65]);
        assert_eq!(strip_start_code(&[0, 0, 1, 0x65]), &[0x65]);
        assert_eq!(strip_start_code(&[0x65, 0, 0, 1]), &[0x65, 0, 0, 1]);

        let once = strip_start_code(AU);
        assert_eq!(AU.len() - once.len(), 4);
        assert_eq!(strip_start_code(once), once);
    }

    #[test]
    fn test_contains_nal_type() {
        assert!(contains_nal_type(AU, NalType::Idr));
        assert!(!contains_nal_type(AU, NalType::NonIdrSlice));
        assert_eq!(first_nal_type(AU), Some(NalType::Sps));
    }

    #[test]
    fn test_ref_idc() {
        let nal = find_nal(AU, NalType::Idr).unwrap();
        assert_eq!(nal.header(), 0x65);
        assert_eq!(nal.ref_idc(), 3);
        assert_eq!(nal.payload_range(), 18..21);
    }
}
