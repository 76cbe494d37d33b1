//! Keyboard classification constants
//!
//! Markers used to tell real keyboards apart from virtual, system and
//! remote-session devices. All comparisons are done on upper-cased ids and
//! lower-cased descriptions.

// ============================================================================
// Device Id Markers
// ============================================================================

/// Namespaces of synthetic devices created by the root or software enumerator
pub const SYNTHETIC_ROOT_PREFIXES: [&str; 2] = ["ROOT\\", "SWD\\"];

/// Markers of the generic HID keyboard driver node
pub const SYSTEM_DRIVER_MARKERS: [&str; 2] = ["HID_DEVICE_SYSTEM_KEYBOARD", "KBDHID\\"];

/// Id prefix of terminal-services redirected input
pub const REMOTE_SESSION_PREFIX: &str = "TS_INPT\\";

/// Id marker of the remote desktop keyboard driver
pub const REMOTE_SESSION_ID_MARKER: &str = "RDP_KBD";

// ============================================================================
// Description Markers
// ============================================================================

/// Description words that indicate a remote-session keyboard
pub const REMOTE_SESSION_WORDS: [&str; 2] = ["remote", "terminal server"];

/// Description word that indicates a virtual keyboard
pub const VIRTUAL_WORD: &str = "virtual";
