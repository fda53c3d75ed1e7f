//! Colour ratio calibration profiles.
//!
//! A profile is a step function over LED indexes: each stored breakpoint
//! applies its ratio from that index up to the next breakpoint. Indexes
//! before the first breakpoint use [`Ratio::DEFAULT`].

pub mod set;

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use ciborium::value::Value;
use log::{debug, error, info, trace};
use parking_lot::RwLock;

use crate::{
    cbor::{self, Container},
    result::{Error, Result, Worst},
    storage::Storage,
    BYTES_PER_LED, MAX_LEDS, MIN_RATIO_LEDS,
};

pub use set::{ProfileKind, ProfileSet};

pub type Index = u16;

const _: () = assert!(Index::MAX as usize > MAX_LEDS, "Index type is too small to cover all LEDs");

/// Upper bound on stored breakpoints.
pub const MAX_RATIOS: usize = (MAX_LEDS + MIN_RATIO_LEDS - 1) / MIN_RATIO_LEDS;

const _: () = assert!(MAX_RATIOS > 0, "Must allow at least one ratio");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ratio {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Ratio {
    /// Very dim, so a profile that fails to load under-drives the power
    /// supply instead of overloading it.
    pub const DEFAULT: Ratio = Ratio { r: 8, g: 8, b: 8 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Ratio { r, g, b }
    }

    pub fn channels(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    fn scale(&self, pixel: &mut [u8]) {
        for (value, factor) in pixel.iter_mut().zip(self.channels()) {
            *value = (u16::from(*value) * u16::from(factor) / u16::from(u8::MAX)) as u8;
        }
    }

    fn adjusted(&self, r: i32, g: i32, b: i32) -> Ratio {
        let clamp = |value: u8, delta: i32| i32::from(value).saturating_add(delta).clamp(0, 255) as u8;

        Ratio::new(clamp(self.r, r), clamp(self.g, g), clamp(self.b, b))
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Ratio::DEFAULT
    }
}

/// Breakpoint map for one profile of one bus.
///
/// Reads and writes of the map are guarded by an internal reader-writer
/// lock. The `modified` flag is not: modifications are expected to come
/// from a single thread, and guarding it would make saves block readers.
#[derive(Default)]
pub struct RatioProfile {
    ratios: RwLock<BTreeMap<Index, Ratio>>,
    modified: AtomicBool,
}

fn valid_index(index: usize) -> Result<Index> {
    if index < MAX_LEDS {
        Index::try_from(index).map_err(|_| Error::OutOfRange)
    } else {
        Err(Error::OutOfRange)
    }
}

fn effective(ratios: &BTreeMap<Index, Ratio>, index: Index) -> Ratio {
    ratios
        .range(..=index)
        .next_back()
        .map_or(Ratio::DEFAULT, |(_, ratio)| *ratio)
}

/// Removes up to `limit` redundant breakpoints, returning how many went.
fn compact_ratios(ratios: &mut BTreeMap<Index, Ratio>, limit: usize) -> usize {
    let mut removed = 0;

    if ratios.is_empty() || limit == 0 {
        return removed;
    }

    let entries: Vec<(Index, Ratio)> = ratios.iter().map(|(index, ratio)| (*index, *ratio)).collect();

    for pair in entries.windows(2).rev() {
        if removed >= limit {
            break;
        }

        if pair[0].1 == pair[1].1 {
            ratios.remove(&pair[1].0);
            removed += 1;
        }
    }

    if removed < limit {
        let first = ratios.iter().next().map(|(index, ratio)| (*index, *ratio));

        if let Some((index, Ratio::DEFAULT)) = first {
            ratios.remove(&index);
            removed += 1;
        }
    }

    removed
}

impl RatioProfile {
    pub fn new() -> Self {
        RatioProfile::default()
    }

    /// Effective ratio at `index`.
    pub fn get(&self, index: usize) -> Result<Ratio> {
        let index = valid_index(index)?;

        Ok(effective(&self.ratios.read(), index))
    }

    /// Stores a breakpoint at `index`, replacing any existing one.
    ///
    /// When the profile is full, one redundant breakpoint is compacted away
    /// to make room. Fails with [`Error::Full`] if there is none.
    pub fn set(&self, index: usize, ratio: Ratio) -> Result {
        let index = valid_index(index)?;
        let mut ratios = self.ratios.write();

        self.replace(&mut ratios, index, ratio)
    }

    /// Adds deltas to the effective ratio at `index`, saturating each
    /// channel, and stores the result as a breakpoint.
    pub fn adjust(&self, index: usize, r: i32, g: i32, b: i32) -> Result {
        let index = valid_index(index)?;
        let mut ratios = self.ratios.write();
        let ratio = effective(&ratios, index).adjusted(r, g, b);

        self.replace(&mut ratios, index, ratio)
    }

    pub fn move_to(&self, src: usize, dst: usize) -> Result {
        self.copy_ratio(src, dst, true)
    }

    pub fn copy(&self, src: usize, dst: usize) -> Result {
        self.copy_ratio(src, dst, false)
    }

    /// Removes the breakpoint at `index`. Index 0 always succeeds because
    /// resetting the baseline to the default is trivially satisfied.
    pub fn remove(&self, index: usize) -> Result {
        let index = valid_index(index)?;
        let mut ratios = self.ratios.write();

        if ratios.remove(&index).is_some() {
            self.modified.store(true, Ordering::Relaxed);
            Ok(())
        } else if index == 0 {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    pub fn clear(&self) {
        let mut ratios = self.ratios.write();

        if !ratios.is_empty() {
            ratios.clear();
            self.modified.store(true, Ordering::Relaxed);
        }
    }

    /// Merges runs with identical ratios, removing at most `limit`
    /// breakpoints. The effective ratio of every index is unchanged.
    pub fn compact(&self, limit: usize) -> bool {
        let mut ratios = self.ratios.write();
        let removed = compact_ratios(&mut ratios, limit);

        if removed > 0 {
            self.modified.store(true, Ordering::Relaxed);
        }
        removed > 0
    }

    /// Start of every run, in ascending order. Always begins with 0.
    pub fn indexes(&self) -> Vec<usize> {
        let ratios = self.ratios.read();
        let mut values = Vec::with_capacity(ratios.len() + 1);

        values.push(0);
        values.extend(ratios.keys().filter(|index| **index > 0).map(|index| usize::from(*index)));
        values
    }

    /// Scales a packed RGB buffer in place, one pass over the pixels.
    pub fn transform(&self, data: &mut [u8]) {
        let ratios = self.ratios.read();
        let mut breakpoints = ratios.iter().peekable();
        let mut ratio = Ratio::DEFAULT;

        for (index, pixel) in data.chunks_mut(BYTES_PER_LED).enumerate() {
            while let Some((start, next)) = breakpoints.peek() {
                if usize::from(**start) > index {
                    break;
                }
                ratio = **next;
                breakpoints.next();
            }

            ratio.scale(pixel);
        }
    }

    /// Writes a table of runs covering the first `limit` LEDs.
    pub fn print<W: fmt::Write>(&self, out: &mut W, limit: usize) -> fmt::Result {
        let limit = limit.min(MAX_LEDS);

        if limit == 0 {
            return Ok(());
        }

        let ratios = self.ratios.read();
        let mut begin = 0;
        let mut ratio = Ratio::DEFAULT;

        writeln!(out, "LEDs         Red Green Blue")?;
        writeln!(out, "------------ --- ----- ----")?;

        for (index, next) in ratios.range(..limit as Index) {
            let index = usize::from(*index);

            if index > begin {
                Self::print_row(out, begin, index - 1, &ratio)?;
                begin = index;
            }
            ratio = *next;
        }

        Self::print_row(out, begin, limit - 1, &ratio)
    }

    fn print_row<W: fmt::Write>(out: &mut W, begin: usize, end: usize, ratio: &Ratio) -> fmt::Result {
        writeln!(out, "{:5}..{:<5} {:3}  {:3}  {:3}", begin, end, ratio.r, ratio.g, ratio.b)
    }

    /// Whether there are changes that haven't been saved.
    pub fn modified(&self) -> bool {
        self.modified.load(Ordering::Relaxed)
    }

    fn copy_ratio(&self, src: usize, dst: usize, remove_src: bool) -> Result {
        let src = valid_index(src)?;
        let dst = valid_index(dst)?;
        let mut ratios = self.ratios.write();

        let ratio = match ratios.get(&src).copied() {
            Some(ratio) => {
                if remove_src {
                    ratios.remove(&src);
                    self.modified.store(true, Ordering::Relaxed);
                }
                ratio
            }
            // The implied default at index 0 can always be copied
            None if src == 0 => Ratio::DEFAULT,
            None => return Err(Error::NotFound),
        };

        self.replace(&mut ratios, dst, ratio)
    }

    fn replace(&self, ratios: &mut BTreeMap<Index, Ratio>, index: Index, ratio: Ratio) -> Result {
        if ratios.remove(&index).is_some() {
            self.modified.store(true, Ordering::Relaxed);
        }

        self.add(ratios, index, ratio)
    }

    fn add(&self, ratios: &mut BTreeMap<Index, Ratio>, index: Index, ratio: Ratio) -> Result {
        if index == 0 && ratio == Ratio::DEFAULT {
            return Ok(());
        }

        if !ratios.contains_key(&index) && ratios.len() >= MAX_RATIOS {
            if compact_ratios(ratios, 1) > 0 {
                self.modified.store(true, Ordering::Relaxed);
            }

            if ratios.len() >= MAX_RATIOS {
                return Err(Error::Full);
            }
        }

        ratios.insert(index, ratio);
        self.modified.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Replaces the profile with the contents of `filename`.
    ///
    /// The profile is cleared first, so a missing or unreadable file
    /// leaves every LED at the default ratio. Malformed records are
    /// replaced by a default breakpoint just after the last good one,
    /// limiting the damage to a dim tail, and the most severe problem is
    /// returned.
    pub(crate) fn load(&self, storage: &dyn Storage, filename: &str, automatic: bool) -> Result {
        let mut ratios = self.ratios.write();

        ratios.clear();
        self.modified.store(false, Ordering::Relaxed);

        if automatic {
            debug!("Reading profile from file {}", filename);
        } else {
            info!("Reading profile from file {}", filename);
        }

        let data = match storage.read(filename) {
            Ok(data) => data,
            Err(err) => {
                if automatic {
                    debug!("Unable to open profile file {} for reading: {}", filename, err);
                } else {
                    error!("Unable to open profile file {} for reading: {}", filename, err);
                }
                return Err(Error::IoError);
            }
        };

        let result = match cbor::read_document(&data, Container::Array) {
            Ok(Value::Array(records)) => self.load_records(&mut ratios, &records),
            Ok(_) => Err(Error::ParseError),
            Err(err) => Err(err),
        };

        match result {
            Err(Error::Full) => {
                error!("Profile file {} contains too many entries (truncated)", filename)
            }
            Err(Error::NotFound) | Err(Error::OutOfRange) | Err(Error::ParseError) => {
                error!("Profile file {} contains invalid data that has been ignored", filename)
            }
            _ => {}
        }

        self.modified.store(result.is_err(), Ordering::Relaxed);
        result
    }

    fn load_records(&self, ratios: &mut BTreeMap<Index, Ratio>, records: &[Value]) -> Result {
        let mut worst = Worst::new();
        let mut last_good: Option<Index> = None;

        for (position, record) in records.iter().enumerate() {
            match Self::parse_record(record, last_good) {
                Ok((index, ratio)) => {
                    if worst.record(self.add(ratios, index, ratio)).is_ok() {
                        last_good = Some(index);
                    }
                }
                Err(err) => {
                    trace!("Ratio config entry {} is invalid: {}", position, err);
                    worst.record::<()>(Err(err)).ok();

                    let substitute = match last_good {
                        Some(index) => valid_index(usize::from(index) + 1).ok(),
                        None => Some(0),
                    };

                    if let Some(index) = substitute {
                        worst.record(self.add(ratios, index, Ratio::DEFAULT)).ok();
                    }
                }
            }
        }

        worst.result()
    }

    fn parse_record(record: &Value, after: Option<Index>) -> Result<(Index, Ratio)> {
        let fields = match record {
            Value::Array(fields) if fields.len() == 2 => fields,
            _ => return Err(Error::ParseError),
        };

        let index = cbor::read_unsigned(&fields[0])?;
        let index = usize::try_from(index).map_err(|_| Error::OutOfRange).and_then(valid_index)?;

        if let Some(previous) = after {
            if index <= previous {
                return Err(Error::ParseError);
            }
        }

        let values = match &fields[1] {
            Value::Array(values) if values.len() == 3 => values,
            _ => return Err(Error::ParseError),
        };

        let mut channels = [0u8; 3];
        for (channel, value) in channels.iter_mut().zip(values) {
            *channel = u8::try_from(cbor::read_unsigned(value)?).map_err(|_| Error::OutOfRange)?;
        }

        Ok((index, Ratio::new(channels[0], channels[1], channels[2])))
    }

    /// Writes the profile to `filename`. An implicit baseline is written
    /// out explicitly so the file describes every LED.
    pub(crate) fn save(&self, storage: &dyn Storage, filename: &str) -> Result {
        let ratios = self.ratios.read();

        info!("Writing profile to file {}", filename);

        let mut records = Vec::with_capacity(ratios.len() + 1);

        if let Some((first, _)) = ratios.iter().next() {
            if *first != 0 {
                records.push(Self::save_record(0, &Ratio::DEFAULT));
            }
        }

        records.extend(ratios.iter().map(|(index, ratio)| Self::save_record(*index, ratio)));

        let result = cbor::write_document(Value::Array(records))
            .and_then(|data| storage.write(filename, &data));

        match result {
            Ok(()) => {
                self.modified.store(false, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                error!("Failed to write profile file {}: {}", filename, err);
                Err(Error::IoError)
            }
        }
    }

    fn save_record(index: Index, ratio: &Ratio) -> Value {
        Value::Array(vec![
            Value::Integer(index.into()),
            Value::Array(ratio.channels().iter().map(|value| Value::Integer((*value).into())).collect()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with(entries: &[(usize, Ratio)]) -> RatioProfile {
        let profile = RatioProfile::new();
        for (index, ratio) in entries {
            profile.set(*index, *ratio).unwrap();
        }
        profile
    }

    #[test]
    fn test_empty_profile_is_default() {
        let profile = RatioProfile::new();
        assert_eq!(profile.get(0), Ok(Ratio::DEFAULT));
        assert_eq!(profile.get(MAX_LEDS - 1), Ok(Ratio::DEFAULT));
        assert_eq!(profile.indexes(), vec![0]);
        assert!(!profile.modified());
    }

    #[test]
    fn test_get_out_of_range() {
        let profile = RatioProfile::new();
        assert_eq!(profile.get(MAX_LEDS), Err(Error::OutOfRange));
        assert_eq!(profile.set(MAX_LEDS, Ratio::new(1, 2, 3)), Err(Error::OutOfRange));
    }

    #[test]
    fn test_set_is_step_function() {
        let profile = profile_with(&[(10, Ratio::new(255, 0, 0))]);
        assert_eq!(profile.get(9), Ok(Ratio::DEFAULT));
        assert_eq!(profile.get(10), Ok(Ratio::new(255, 0, 0)));
        assert_eq!(profile.get(100), Ok(Ratio::new(255, 0, 0)));
        assert!(profile.modified());
    }

    #[test]
    fn test_set_default_at_zero_is_implicit() {
        let profile = RatioProfile::new();
        profile.set(0, Ratio::DEFAULT).unwrap();
        assert_eq!(profile.indexes(), vec![0]);
        assert!(!profile.modified());
    }

    #[test]
    fn test_adjust_saturates() {
        let profile = profile_with(&[(5, Ratio::new(250, 10, 100))]);
        profile.adjust(5, 10, -20, 5).unwrap();
        assert_eq!(profile.get(5), Ok(Ratio::new(255, 0, 105)));

        profile.adjust(20, 1, 1, 1).unwrap();
        assert_eq!(profile.get(20), Ok(Ratio::new(255, 1, 106)));
        assert_eq!(profile.get(19), Ok(Ratio::new(255, 0, 105)));
    }

    #[test]
    fn test_adjust_extreme_deltas() {
        let profile = profile_with(&[(5, Ratio::new(200, 0, 100))]);

        profile.adjust(5, i32::MAX, i32::MIN, i32::MAX).unwrap();
        assert_eq!(profile.get(5), Ok(Ratio::new(255, 0, 255)));

        profile.adjust(5, i32::MIN, i32::MAX, i32::MIN).unwrap();
        assert_eq!(profile.get(5), Ok(Ratio::new(0, 255, 0)));
    }

    #[test]
    fn test_copy_and_move() {
        let profile = profile_with(&[(10, Ratio::new(1, 2, 3))]);

        profile.copy(10, 20).unwrap();
        assert_eq!(profile.indexes(), vec![0, 10, 20]);
        assert_eq!(profile.get(25), Ok(Ratio::new(1, 2, 3)));

        profile.move_to(20, 30).unwrap();
        assert_eq!(profile.indexes(), vec![0, 10, 30]);

        assert_eq!(profile.copy(15, 40), Err(Error::NotFound));
        assert_eq!(profile.move_to(15, 40), Err(Error::NotFound));
        assert_eq!(profile.copy(10, MAX_LEDS), Err(Error::OutOfRange));

        // The implied baseline can always be copied
        profile.copy(0, 10).unwrap();
        assert_eq!(profile.get(10), Ok(Ratio::DEFAULT));
        assert_eq!(profile.indexes(), vec![0, 10, 30]);
    }

    #[test]
    fn test_remove() {
        let profile = profile_with(&[(10, Ratio::new(1, 2, 3))]);
        assert_eq!(profile.remove(11), Err(Error::NotFound));
        assert_eq!(profile.remove(0), Ok(()));
        assert_eq!(profile.remove(10), Ok(()));
        assert_eq!(profile.remove(10), Err(Error::NotFound));
        assert_eq!(profile.remove(MAX_LEDS), Err(Error::OutOfRange));
        assert_eq!(profile.get(50), Ok(Ratio::DEFAULT));
    }

    #[test]
    fn test_clear() {
        let profile = profile_with(&[(10, Ratio::new(1, 2, 3)), (20, Ratio::new(4, 5, 6))]);
        profile.clear();
        assert_eq!(profile.indexes(), vec![0]);
        assert_eq!(profile.get(20), Ok(Ratio::DEFAULT));
    }

    #[test]
    fn test_compact_merges_runs() {
        let red = Ratio::new(255, 0, 0);
        let profile = profile_with(&[
            (0, Ratio::DEFAULT),
            (5, Ratio::DEFAULT),
            (10, red),
            (20, red),
            (30, red),
            (40, Ratio::new(1, 1, 1)),
        ]);
        let before: Vec<Ratio> = (0..MAX_LEDS).map(|i| profile.get(i).unwrap()).collect();

        assert!(profile.compact(usize::MAX));
        assert_eq!(profile.indexes(), vec![0, 10, 40]);
        assert!(!profile.compact(usize::MAX));

        let after: Vec<Ratio> = (0..MAX_LEDS).map(|i| profile.get(i).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_compact_respects_limit() {
        let red = Ratio::new(255, 0, 0);
        let profile = profile_with(&[(10, red), (20, red), (30, red)]);
        assert!(profile.compact(1));
        assert_eq!(profile.indexes(), vec![0, 10, 20]);
        assert!(!RatioProfile::new().compact(usize::MAX));
    }

    #[test]
    fn test_full_profile() {
        let profile = RatioProfile::new();
        for i in 0..MAX_RATIOS {
            let value = (i + 10) as u8;
            profile.set(i * 10 + 1, Ratio::new(value, value, value)).unwrap();
        }
        assert_eq!(profile.indexes().len(), MAX_RATIOS + 1);
        assert_eq!(profile.set(999, Ratio::new(200, 0, 0)), Err(Error::Full));

        // Replacing an existing breakpoint doesn't need a new slot
        assert_eq!(profile.set(1, Ratio::new(200, 0, 0)), Ok(()));
    }

    #[test]
    fn test_full_profile_compacts_one() {
        let profile = RatioProfile::new();
        for i in 0..MAX_RATIOS {
            let value = if i == 1 { 10 } else { (i + 10) as u8 };
            profile.set(i * 10 + 1, Ratio::new(value, value, value)).unwrap();
        }
        assert_eq!(profile.set(999, Ratio::new(200, 0, 0)), Ok(()));
        assert_eq!(profile.indexes().len(), MAX_RATIOS + 1);
        assert_eq!(profile.get(999), Ok(Ratio::new(200, 0, 0)));
    }

    #[test]
    fn test_transform() {
        let profile = profile_with(&[(1, Ratio::new(255, 128, 0))]);
        let mut data = vec![255, 255, 255, 255, 255, 255, 100, 200, 50, 10];
        profile.transform(&mut data);
        assert_eq!(data, vec![8, 8, 8, 255, 128, 0, 100, 100, 0, 10]);
    }

    #[test]
    fn test_print() {
        let profile = profile_with(&[(10, Ratio::new(255, 0, 0)), (20, Ratio::new(1, 2, 3))]);
        let mut out = String::new();
        profile.print(&mut out, 15).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "    0..9       8    8    8");
        assert_eq!(lines[3], "   10..14    255    0    0");

        let mut out = String::new();
        profile.print(&mut out, 0).unwrap();
        assert!(out.is_empty());

        // The limit counts LEDs, not rows
        let profile = profile_with(&[(100, Ratio::new(255, 0, 0))]);
        let mut out = String::new();
        profile.print(&mut out, 300).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "    0..99      8    8    8");
        assert_eq!(lines[3], "  100..299   255    0    0");
    }
}
