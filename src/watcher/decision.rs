//! Mode decision engine
//!
//! Pure mapping from keyboard presence and the live OS posture to the
//! posture that should be applied, if any.

use std::fmt;

/// Shell posture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Posture {
    /// Touch-first shell, taskbar can collapse
    Tablet,
    /// Fixed taskbar, keyboard and pointer oriented
    Desktop,
}

impl Posture {
    pub fn from_tablet_flag(tablet: bool) -> Self {
        if tablet {
            Posture::Tablet
        } else {
            Posture::Desktop
        }
    }

    pub fn is_tablet(self) -> bool {
        self == Posture::Tablet
    }
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Posture::Tablet => write!(f, "tablet mode"),
            Posture::Desktop => write!(f, "desktop mode"),
        }
    }
}

/// Decide which posture to apply.
///
/// Returns `None` when the current posture already fits, so callers never
/// re-apply a matching posture.
pub fn decide(presence_count: usize, current: Posture) -> Option<Posture> {
    match (presence_count > 0, current) {
        (true, Posture::Tablet) => Some(Posture::Desktop),
        (false, Posture::Desktop) => Some(Posture::Tablet),
        _ => None,
    }
}
