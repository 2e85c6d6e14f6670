//! Gap and overlap detection over serial sequences.

use crate::event::Serial;

/// The first serial that broke continuity, and what was expected instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("serial discontinuity: expected {expected}, found {found}")]
pub struct Discontinuity {
    pub expected: Serial,
    pub found: Serial,
}

/// Check that `serials` continues `start` with no gaps or repeats.
///
/// An empty sequence is continuous.
///
/// # Examples
///
/// ```
/// use boardfold::continuity::continuous;
///
/// assert!(continuous(4, [5, 6, 7]));
/// assert!(!continuous(4, [5, 7]));
/// assert!(!continuous(4, [4, 5]));
/// assert!(continuous(4, std::iter::empty()));
/// ```
pub fn continuous(start: Serial, serials: impl IntoIterator<Item = Serial>) -> bool {
    let mut verifier = ContinuityVerifier::new(start);
    serials.into_iter().all(|serial| verifier.accept(serial).is_ok())
}

/// Incremental continuity bookkeeping.
///
/// Holds the last accepted serial so a stream can be verified chunk by chunk
/// without keeping the chunks around. A rejected serial does not advance the
/// verifier. It never repairs anything; the caller decides what a violation
/// means.
#[derive(Debug, Clone)]
pub struct ContinuityVerifier {
    last: Serial,
}

impl ContinuityVerifier {
    pub fn new(start: Serial) -> Self {
        ContinuityVerifier { last: start }
    }

    /// Accept the next individual serial.
    pub fn accept(&mut self, serial: Serial) -> Result<(), Discontinuity> {
        let expected = self.last + 1;
        if serial != expected {
            log::warn!("boardfold: continuity broken: expected serial {expected}, found {serial}");
            return Err(Discontinuity {
                expected,
                found: serial,
            });
        }
        self.last = serial;
        Ok(())
    }

    /// Accept a whole bundle by its first and last serials.
    pub fn accept_bundle(&mut self, first: Serial, last: Serial) -> Result<(), Discontinuity> {
        if last < first {
            log::warn!("boardfold: continuity broken: bundle ends at {last} before it starts at {first}");
            return Err(Discontinuity {
                expected: first,
                found: last,
            });
        }
        self.accept(first)?;
        self.last = last;
        Ok(())
    }

    /// The last accepted serial, or the start value if nothing was accepted.
    pub fn last(&self) -> Serial {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_serial_does_not_advance() {
        let mut v = ContinuityVerifier::new(0);
        v.accept(1).unwrap();
        assert_eq!(
            v.accept(3),
            Err(Discontinuity {
                expected: 2,
                found: 3
            })
        );
        assert_eq!(v.last(), 1);
        v.accept(2).unwrap();
    }

    #[test]
    fn bundles_chain_across_boundaries() {
        let mut v = ContinuityVerifier::new(0);
        v.accept_bundle(1, 5).unwrap();
        assert_eq!(
            v.accept_bundle(8, 10),
            Err(Discontinuity {
                expected: 6,
                found: 8
            })
        );
        v.accept_bundle(6, 10).unwrap();
        assert_eq!(v.last(), 10);
    }

    #[test]
    fn inverted_bundle_does_not_advance() {
        let mut v = ContinuityVerifier::new(0);
        assert_eq!(
            v.accept_bundle(1, 0),
            Err(Discontinuity {
                expected: 1,
                found: 0
            })
        );
        assert_eq!(v.last(), 0);
        v.accept_bundle(1, 2).unwrap();
        assert_eq!(v.last(), 2);
    }
}
