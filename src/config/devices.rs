use std::env;

/// The accelerator ids visible to this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceList {
    ids: Vec<String>,
}

impl DeviceList {
    pub const ENV_VAR: &'static str = "CUDA_VISIBLE_DEVICES";
    const DEFAULT: &'static str = "0";

    /// Parses a comma separated id list, skipping blank entries.
    pub fn parse(ids: &str) -> Self {
        let ids = ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();

        Self { ids }
    }

    /// Reads `CUDA_VISIBLE_DEVICES`, defaulting to device `0` when unset.
    pub fn from_env() -> Self {
        let ids = env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT.to_string());
        Self::parse(&ids)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Data-parallel training needs at least two devices.
    pub fn supports_multi(&self) -> bool {
        self.ids.len() >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_ids() {
        let devices = DeviceList::parse("0, 1,,3");

        assert_eq!(devices.ids(), ["0", "1", "3"]);
        assert!(devices.supports_multi());
    }

    #[test]
    fn single_device_disables_multi() {
        assert!(!DeviceList::parse("0").supports_multi());
        assert!(DeviceList::parse("").is_empty());
    }
}
