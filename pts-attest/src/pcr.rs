//! PCR set model (spec §4.3, component C): selection bitmap, extension
//! bookkeeping, and the PCR Composite byte structure.

use crate::error::{Error, Result};
use crate::wire::Writer;

/// TPM 1.2 register count.
pub const PCR_COUNT: usize = 24;

/// The PCR model embedded in [`crate::session::AttestationSession`].
///
/// A plain value type, not a separately-allocated object (Design Note §9):
/// the session owns one `PcrSet` by value.
#[derive(Debug, Clone, Default)]
pub struct PcrSet {
    /// Uniform register width in bytes, fixed on the first [`PcrSet::add`].
    pcr_len: Option<usize>,
    /// Latest post-extension value per register, when known.
    values: [Option<Vec<u8>>; PCR_COUNT],
    /// 24-bit selection bitmap, 3 bytes, little-endian bit order per byte.
    select: [u8; 3],
    /// Population count of `select`.
    count: u32,
    /// Highest selected index, or `None` if nothing is selected.
    max_index: Option<u32>,
}

fn check_index(pcr_index: u32) -> Result<()> {
    if pcr_index as usize >= PCR_COUNT {
        return Err(Error::PcrIndexOutOfRange(pcr_index));
    }
    Ok(())
}

impl PcrSet {
    /// Construct an empty PCR set with nothing selected.
    pub fn new() -> Self {
        Self::default()
    }

    fn is_selected(&self, pcr_index: u32) -> bool {
        let byte = pcr_index as usize / 8;
        let bit = pcr_index as usize % 8;
        self.select[byte] & (1 << bit) != 0
    }

    fn set_selected(&mut self, pcr_index: u32) {
        let byte = pcr_index as usize / 8;
        let bit = pcr_index as usize % 8;
        self.select[byte] |= 1 << bit;
    }

    /// Number of registers currently selected.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Highest selected index, if any.
    pub fn max_index(&self) -> Option<u32> {
        self.max_index
    }

    /// Uniform register width in bytes, once fixed by the first `add()`.
    pub fn pcr_len(&self) -> Option<usize> {
        self.pcr_len
    }

    /// Selection bitmap, 3 bytes, little-endian bit order within each byte.
    pub fn select_bytes(&self) -> [u8; 3] {
        self.select
    }

    /// `size_of_select` for the PCR Composite header: `max(3, 1 + max/8)`
    /// bytes, per spec §6/§8 property 3 (`PCR_MAX_NUM/8 == 3` for 24 PCRs).
    pub fn size_of_select(&self) -> u16 {
        match self.max_index {
            Some(m) => std::cmp::max(3, 1 + m as u16 / 8),
            None => 3,
        }
    }

    /// Stored post-extension value for `pcr_index`, if any.
    pub fn value(&self, pcr_index: u32) -> Result<Option<&[u8]>> {
        check_index(pcr_index)?;
        Ok(self.values[pcr_index as usize].as_deref())
    }

    /// Mark `pcr_index` as selected. Idempotent.
    pub fn select(&mut self, pcr_index: u32) -> Result<()> {
        check_index(pcr_index)?;
        if !self.is_selected(pcr_index) {
            self.set_selected(pcr_index);
            self.count += 1;
            self.max_index = Some(self.max_index.map_or(pcr_index, |m| m.max(pcr_index)));
        }
        Ok(())
    }

    /// Record a post-extension value for `pcr_index`.
    ///
    /// On the first call, fixes `pcr_len` to `|pcr_after|`; later calls with
    /// a different length fail with [`Error::PcrLengthMismatch`].
    ///
    /// If the register already holds a value, it is compared against
    /// `pcr_before` and a mismatch is logged (not fatal) — the new value
    /// still replaces it (`pcr_before` mismatch, Design Note §9 Open
    /// Question 1, preserved as-is).
    pub fn add(&mut self, pcr_index: u32, pcr_before: &[u8], pcr_after: &[u8]) -> Result<()> {
        check_index(pcr_index)?;
        match self.pcr_len {
            Some(len) if len != pcr_after.len() => {
                return Err(Error::PcrLengthMismatch {
                    expected: len,
                    actual: pcr_after.len(),
                });
            }
            Some(_) => {}
            None => self.pcr_len = Some(pcr_after.len()),
        }

        let idx = pcr_index as usize;
        if let Some(existing) = &self.values[idx] {
            if existing.as_slice() != pcr_before {
                tracing::warn!(
                    pcr_index,
                    expected = %hex::encode(existing),
                    actual = %hex::encode(pcr_before),
                    "pcr_before mismatch against stored value; overwriting anyway"
                );
            }
        }

        self.values[idx] = Some(pcr_after.to_vec());
        self.select(pcr_index)?;
        Ok(())
    }

    /// Free stored values and reset selection, count, and max index.
    pub fn clear(&mut self) {
        self.values = Default::default();
        self.select = [0; 3];
        self.count = 0;
        self.max_index = None;
        self.pcr_len = None;
    }

    /// Build the PCR Composite byte structure (spec §6) from the current
    /// selection and stored values.
    ///
    /// `value_size = count_with_values * pcr_len`; the concatenation is in
    /// ascending PCR index order, restricted to indices that actually have
    /// a stored value (spec §8 property 4).
    pub fn compose(&self) -> Vec<u8> {
        let pcr_len = self.pcr_len.unwrap_or(0);
        let size_of_select = self.size_of_select();

        let mut present: Vec<(u32, &[u8])> = Vec::new();
        for i in 0..PCR_COUNT as u32 {
            if self.is_selected(i) {
                if let Some(v) = &self.values[i as usize] {
                    present.push((i, v.as_slice()));
                }
            }
        }
        let value_size = (present.len() * pcr_len) as u32;

        let mut w = Writer::with_capacity(2 + size_of_select as usize + 4 + value_size as usize);
        w.put_u16(size_of_select);
        w.put_bytes(&self.select[..size_of_select as usize]);
        w.put_u32(value_size);
        for (_, v) in present {
            w.put_bytes(v);
        }
        w.finish()
    }
}
