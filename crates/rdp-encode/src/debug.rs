/// Per-process debug flags, parsed once from `GNOME_REMOTE_DESKTOP_DEBUG`
/// (or whatever env var the binary wires in). Mirrors the source's global,
/// process-wide debug flag set (see design notes on "Global state").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub vnc: bool,
    pub tpm: bool,
    pub vk_validation: bool,
    pub vk_times: bool,
    pub va_times: bool,
}

impl DebugFlags {
    /// Parses a colon- or comma-separated flag list, e.g. `"vk-times:va-times"`.
    pub fn parse(value: &str) -> Self {
        let mut flags = Self::default();
        for token in value.split([':', ',']) {
            match token.trim() {
                "vnc" => flags.vnc = true,
                "tpm" => flags.tpm = true,
                "vk-validation" => flags.vk_validation = true,
                "vk-times" => flags.vk_times = true,
                "va-times" => flags.va_times = true,
                "" => {}
                other => tracing::warn!(flag = other, "unrecognised debug flag"),
            }
        }
        flags
    }

    /// Reads and parses the given environment variable, defaulting to no
    /// flags set if it is absent.
    pub fn from_env(var: &str) -> Self {
        std::env::var(var).map(|v| Self::parse(&v)).unwrap_or_default()
    }

    pub fn any_time_debug(&self) -> bool {
        self.vk_times || self.va_times
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_flags() {
        let flags = DebugFlags::parse("vk-times:va-times");
        assert!(flags.vk_times);
        assert!(flags.va_times);
        assert!(!flags.vnc);
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let flags = DebugFlags::parse("bogus,vnc");
        assert!(flags.vnc);
    }
}
