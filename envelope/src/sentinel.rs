//! Envelope sentinel literals (§6 "Envelope literals").

/// The primary opening sentinel. Output always uses this form.
pub const OPEN_PRIMARY: &str = "<toolbridge:calls>";
pub const CLOSE_PRIMARY: &str = "</toolbridge:calls>";

/// A legacy alias accepted on input for backward compatibility; never emitted.
pub const OPEN_LEGACY: &str = "<__toolcall__>";
pub const CLOSE_LEGACY: &str = "</__toolcall__>";

/// Recognized (opening, closing) sentinel pairs, primary first so that when a
/// string could match either form at the same offset the primary form wins.
pub const SENTINEL_PAIRS: &[(&str, &str)] = &[
    (OPEN_PRIMARY, CLOSE_PRIMARY),
    (OPEN_LEGACY, CLOSE_LEGACY),
];

/// Longest opening sentinel, in bytes — drives the streaming detector's trailing
/// window size (§4.2: "size = len(opening sentinel) + margin").
pub fn longest_open_len() -> usize {
    SENTINEL_PAIRS
        .iter()
        .map(|(open, _)| open.len())
        .max()
        .unwrap_or(0)
}
