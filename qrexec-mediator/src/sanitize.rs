//! Byte-sanitization policy applied to stdout/stderr frames before they're
//! sent, and to stdin payload when it's about to be echoed back out over an
//! inherited stdout fd (the `fd == 1` case in component D).

use std::borrow::Cow;

/// Tri-state knob: `Inherit` means "use the session default", which is
/// itself `Off` unless the caller explicitly turned sanitization on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplaceChars {
    Off,
    On,
    #[default]
    Inherit,
}

impl ReplaceChars {
    fn resolve(self, session_default: bool) -> bool {
        match self {
            Self::Off => false,
            Self::On => true,
            Self::Inherit => session_default,
        }
    }
}

/// Control bytes considered unsafe to forward verbatim: C0 controls other
/// than tab/newline/carriage-return, and DEL.
fn is_unsafe_control(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F)
}

/// Replace unsafe control bytes with `_` if the resolved policy calls for
/// it; otherwise return the input unchanged (no allocation).
pub fn sanitize(data: &[u8], policy: ReplaceChars, session_default: bool) -> Cow<'_, [u8]> {
    if !policy.resolve(session_default) || !data.iter().any(|&b| is_unsafe_control(b)) {
        return Cow::Borrowed(data);
    }
    let mut out = data.to_vec();
    for b in &mut out {
        if is_unsafe_control(*b) {
            *b = b'_';
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_never_sanitizes() {
        let data = b"\x01bad";
        assert_eq!(&*sanitize(data, ReplaceChars::Off, true), data);
    }

    #[test]
    fn on_replaces_unsafe_controls() {
        let data = b"\x01bad\x7f";
        assert_eq!(&*sanitize(data, ReplaceChars::On, false), b"_bad_");
    }

    #[test]
    fn inherit_follows_session_default() {
        let data = b"\x01bad";
        assert_eq!(&*sanitize(data, ReplaceChars::Inherit, false), data);
        assert_eq!(&*sanitize(data, ReplaceChars::Inherit, true), b"_bad");
    }

    #[test]
    fn tab_newline_cr_are_preserved() {
        let data = b"a\tb\nc\r";
        assert_eq!(&*sanitize(data, ReplaceChars::On, true), data);
    }

    #[test]
    fn clean_input_is_borrowed_not_copied() {
        let data = b"clean text";
        assert!(matches!(
            sanitize(data, ReplaceChars::On, true),
            Cow::Borrowed(_)
        ));
    }
}
