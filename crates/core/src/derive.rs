//! Limb lead derivation.
//!
//! Leads III, aVR, aVL and aVF follow from I and II (Einthoven and Goldberger):
//!
//! ```text
//! III = II - I
//! aVR = -(I + II) / 2
//! aVL = (2*I - II) / 2     or  (I - III) / 2   with a recorded III
//! aVF = (2*II - I) / 2     or  (II + III) / 2  with a recorded III
//! ```
//!
//! Sums are taken in 32 bits, divisions truncate toward zero and results
//! saturate to 16 bits.

use crate::error::{IncompleteSignalError, LeadGeometryError, Result};
use crate::leads::LeadType;
use crate::signal::{LeadSignal, Signal};

/// The four leads derived from I and II.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedLeads {
    pub iii: Vec<i16>,
    pub avr: Vec<i16>,
    pub avl: Vec<i16>,
    pub avf: Vec<i16>,
}

fn saturate(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn combine(a: &[i16], b: &[i16], f: impl Fn(i32, i32) -> i32) -> Vec<i16> {
    a.iter().zip(b).map(|(&x, &y)| saturate(f(x as i32, y as i32))).collect()
}

fn same_length(a: &[i16], b: &[i16]) -> Result<()> {
    if a.len() != b.len() {
        return Err(LeadGeometryError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        }
        .into());
    }
    Ok(())
}

/// Derive III, aVR, aVL and aVF from I and II.
pub fn derive_from_two(i: &[i16], ii: &[i16]) -> Result<DerivedLeads> {
    same_length(i, ii)?;
    Ok(DerivedLeads {
        iii: combine(i, ii, |i, ii| ii - i),
        avr: combine(i, ii, |i, ii| -((i + ii) / 2)),
        avl: combine(i, ii, |i, ii| (2 * i - ii) / 2),
        avf: combine(i, ii, |i, ii| (2 * ii - i) / 2),
    })
}

/// Derive aVR, aVL and aVF from I, II and a recorded III.
pub fn derive_from_three(i: &[i16], ii: &[i16], iii: &[i16]) -> Result<DerivedLeads> {
    same_length(i, ii)?;
    same_length(i, iii)?;
    Ok(DerivedLeads {
        iii: iii.to_vec(),
        avr: combine(i, ii, |i, ii| -((i + ii) / 2)),
        avl: combine(i, iii, |i, iii| (i - iii) / 2),
        avf: combine(ii, iii, |ii, iii| (ii + iii) / 2),
    })
}

fn split(leads: Option<DerivedLeads>) -> [Option<Vec<i16>>; 4] {
    match leads {
        Some(d) => [Some(d.iii), Some(d.avr), Some(d.avl), Some(d.avf)],
        None => [None, None, None, None],
    }
}

fn derive(i: &[i16], ii: &[i16], iii: Option<&[i16]>) -> Result<DerivedLeads> {
    match iii {
        Some(iii) => derive_from_three(i, ii, iii),
        None => derive_from_two(i, ii),
    }
}

/// Append whichever of III, aVR, aVL and aVF the signal lacks.
///
/// Rhythm and reference beats are derived independently; I and II (and III
/// when present) must cover the same rhythm samples. Returns the number of
/// leads added.
pub fn derive_limb_leads(signal: &mut Signal) -> Result<usize> {
    let lead_i = signal
        .lead(LeadType::I)
        .ok_or_else(|| IncompleteSignalError::MissingLead(LeadType::I.to_string()))?;
    let lead_ii = signal
        .lead(LeadType::II)
        .ok_or_else(|| IncompleteSignalError::MissingLead(LeadType::II.to_string()))?;
    let lead_iii = signal.lead(LeadType::III);

    for other in std::iter::once(lead_ii).chain(lead_iii) {
        if other.rhythm_start != lead_i.rhythm_start || other.rhythm_end != lead_i.rhythm_end {
            return Err(LeadGeometryError::ExtentMismatch {
                left_start: lead_i.rhythm_start as u32,
                left_end: lead_i.rhythm_end as u32,
                right_start: other.rhythm_start as u32,
                right_end: other.rhythm_end as u32,
            }
            .into());
        }
    }

    let rhythm = match (&lead_i.rhythm, &lead_ii.rhythm) {
        (Some(i), Some(ii)) => Some(derive(i, ii, lead_iii.and_then(|l| l.rhythm.as_deref()))?),
        _ => None,
    };
    let median = match (&lead_i.median, &lead_ii.median) {
        (Some(i), Some(ii)) => Some(derive(i, ii, lead_iii.and_then(|l| l.median.as_deref()))?),
        _ => None,
    };
    if rhythm.is_none() && median.is_none() {
        return Err(IncompleteSignalError::MissingLead("I and II samples".into()).into());
    }

    let (rhythm_start, rhythm_end) = (lead_i.rhythm_start, lead_i.rhythm_end);
    let kinds = [LeadType::III, LeadType::AVR, LeadType::AVL, LeadType::AVF];
    let candidates = kinds.into_iter().zip(split(rhythm)).zip(split(median));

    let mut added = 0;
    for ((lead, rhythm), median) in candidates {
        if signal.lead(lead).is_some() {
            continue;
        }
        signal.leads.push(LeadSignal {
            lead,
            rhythm,
            median,
            rhythm_start,
            rhythm_end,
        });
        added += 1;
    }
    tracing::debug!(added, "derived limb leads");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const I: [i16; 3] = [100, -50, 0];
    const II: [i16; 3] = [200, 10, -30];

    #[test]
    fn test_two_lead_derivation() {
        let derived = derive_from_two(&I, &II).unwrap();
        assert_eq!(derived.iii, vec![100, 60, -30]);
        assert_eq!(derived.avr, vec![-150, 20, 15]);
        assert_eq!(derived.avl, vec![0, -55, 15]);
        // (2 * -30 - 0) / 2
        assert_eq!(derived.avf, vec![150, 35, -30]);
    }

    #[test]
    fn test_three_lead_derivation() {
        let iii = [100, 60, -30];
        let derived = derive_from_three(&I, &II, &iii).unwrap();
        assert_eq!(derived.avr, vec![-150, 20, 15]);
        assert_eq!(derived.avl, vec![0, -55, 15]);
        assert_eq!(derived.avf, vec![150, 35, -30]);
    }

    #[test]
    fn test_saturation() {
        let derived = derive_from_two(&[i16::MIN], &[i16::MAX]).unwrap();
        assert_eq!(derived.iii, vec![i16::MAX]);
        let derived = derive_from_two(&[i16::MAX], &[i16::MIN]).unwrap();
        assert_eq!(derived.iii, vec![i16::MIN]);
        assert_eq!(derived.avl, vec![i16::MAX]);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            derive_from_two(&I, &II[..2]),
            Err(Error::InvalidLeadGeometry(LeadGeometryError::LengthMismatch { left: 3, right: 2 }))
        ));
        assert!(derive_from_three(&I, &II, &[0; 4]).is_err());
    }

    #[test]
    fn test_signal_derivation() {
        let mut signal = Signal::rhythm(
            vec![
                LeadSignal::new(LeadType::I, I.to_vec()).with_median(vec![10, 20]),
                LeadSignal::new(LeadType::II, II.to_vec()).with_median(vec![30, 40]),
                LeadSignal::new(LeadType::AVR, vec![7, 7, 7]),
            ],
            5.0,
            500,
        );
        assert_eq!(derive_limb_leads(&mut signal).unwrap(), 3);
        assert_eq!(signal.leads.len(), 6);

        let iii = signal.lead(LeadType::III).unwrap();
        assert_eq!(iii.rhythm.as_deref(), Some(&[100, 60, -30][..]));
        assert_eq!(iii.median.as_deref(), Some(&[20, 20][..]));
        // Recorded aVR kept
        assert_eq!(signal.lead(LeadType::AVR).unwrap().rhythm.as_deref(), Some(&[7, 7, 7][..]));
        assert_eq!(derive_limb_leads(&mut signal).unwrap(), 0);
    }

    #[test]
    fn test_signal_missing_or_misaligned_leads() {
        let mut signal = Signal::rhythm(vec![LeadSignal::new(LeadType::I, I.to_vec())], 5.0, 500);
        assert!(matches!(
            derive_limb_leads(&mut signal),
            Err(Error::IncompleteSignal(IncompleteSignalError::MissingLead(_)))
        ));

        signal.leads.push(LeadSignal::new(LeadType::II, II.to_vec()).with_start(10));
        assert!(matches!(
            derive_limb_leads(&mut signal),
            Err(Error::InvalidLeadGeometry(LeadGeometryError::ExtentMismatch { .. }))
        ));
    }
}
