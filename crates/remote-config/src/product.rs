use std::fmt;

/// Remote-configuration product handled by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Product {
    /// Overrides, exclusions, actions and custom rules.
    Asm,
    /// Full ruleset replacement.
    AsmDd,
    /// Rule data (IP and user blocklists).
    AsmData,
    /// Feature toggles.
    AsmFeatures,
}

impl Product {
    pub const ALL: [Product; 4] = [
        Product::Asm,
        Product::AsmDd,
        Product::AsmData,
        Product::AsmFeatures,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Product::Asm => "ASM",
            Product::AsmDd => "ASM_DD",
            Product::AsmData => "ASM_DATA",
            Product::AsmFeatures => "ASM_FEATURES",
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn from_name(name: &str) -> Option<Product> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
