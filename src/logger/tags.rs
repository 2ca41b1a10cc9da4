/// Module tags for log filtering and alignment

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Scanner,
    Source,
    Merge,
    Score,
    Store,
    Cache,
    Events,
    Config,
    System,
}

impl LogTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Scanner => "SCANNER",
            LogTag::Source => "SOURCE",
            LogTag::Merge => "MERGE",
            LogTag::Score => "SCORE",
            LogTag::Store => "STORE",
            LogTag::Cache => "CACHE",
            LogTag::Events => "EVENTS",
            LogTag::Config => "CONFIG",
            LogTag::System => "SYSTEM",
        }
    }

    /// Key used by --debug-<module> command line flags
    pub fn to_debug_key(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
