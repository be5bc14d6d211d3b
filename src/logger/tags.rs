/// Log tags identify the subsystem a message comes from.
/// Each tag maps to a `--debug-<key>` command-line flag.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    Ledger,
    Registry,
    Recovery,
    Snapshot,
    Exchange,
    Worker,
    Shutdown,
}

impl LogTag {
    pub const ALL: [LogTag; 9] = [
        LogTag::System,
        LogTag::Config,
        LogTag::Ledger,
        LogTag::Registry,
        LogTag::Recovery,
        LogTag::Snapshot,
        LogTag::Exchange,
        LogTag::Worker,
        LogTag::Shutdown,
    ];

    /// Key used in `--debug-<key>` and `--verbose-<key>` flags
    pub fn to_debug_key(&self) -> String {
        self.to_plain_string().to_lowercase()
    }

    /// Uncolored label for file output
    pub fn to_plain_string(&self) -> String {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Config => "CONFIG",
            LogTag::Ledger => "LEDGER",
            LogTag::Registry => "REGISTRY",
            LogTag::Recovery => "RECOVERY",
            LogTag::Snapshot => "SNAPSHOT",
            LogTag::Exchange => "EXCHANGE",
            LogTag::Worker => "WORKER",
            LogTag::Shutdown => "SHUTDOWN",
        }
        .to_string()
    }

    pub fn from_debug_key(key: &str) -> Option<Self> {
        LogTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.to_debug_key() == key.to_lowercase())
    }
}
