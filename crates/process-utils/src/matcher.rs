//! Line-matching policies.

/// Extracts structured progress from a single line of process output.
///
/// The runner is format-agnostic: every tool whose output is parsed gets its
/// own implementation, so a format change in a third-party tool only touches
/// its matcher.
pub trait LineMatcher {
    /// Value extracted from a matching line.
    type Output;

    /// Returns `Some` when `line` carries progress information.
    fn match_line(&self, line: &str) -> Option<Self::Output>;
}

/// Matcher that never matches. Used when only the transcript is wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMatch;

impl LineMatcher for NoMatch {
    type Output = ();

    fn match_line(&self, _line: &str) -> Option<Self::Output> {
        None
    }
}

impl<M: LineMatcher + ?Sized> LineMatcher for &M {
    type Output = M::Output;

    fn match_line(&self, line: &str) -> Option<Self::Output> {
        (**self).match_line(line)
    }
}
