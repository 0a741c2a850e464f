//! Modem result codes and escape sequences.
//!
//! Checked against the trimmed reply to a dial or hang-up command.

/// Carrier established. Modems append the negotiated rate, e.g.
/// `CONNECT 2400/NONE`.
pub const CONNECT: &str = "CONNECT";

/// Remote end busy.
pub const BUSY: &str = "BUSY";

/// No carrier detected, or carrier lost after hang-up.
pub const NO_CARRIER: &str = "NO CARRIER";

/// Hayes escape sequence back to command mode. Not echoed by the modem.
pub const ESCAPE_SEQUENCE: &str = "+++";

/// Dial command prefix; the number follows after a space.
pub const DIAL_COMMAND: &str = "atd";

/// Hang-up attempts before giving up.
pub const HANG_UP_ATTEMPTS: u32 = 5;
