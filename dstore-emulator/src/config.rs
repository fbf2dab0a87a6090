/// Emulator configuration for paging and id allocation
#[derive(Debug, Clone, PartialEq)]
pub struct EmulatorConfig {
    /// Maximum entities returned by one RunQuery call
    pub page_size: usize,

    /// Maximum keys resolved by one Lookup call; the rest come back deferred
    pub lookup_batch_limit: usize,

    /// First numeric id handed out for incomplete keys
    pub first_allocated_id: i64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            page_size: 300,
            lookup_batch_limit: 1000,
            first_allocated_id: 1,
        }
    }
}

impl EmulatorConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the RunQuery page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the number of keys a single Lookup resolves
    pub fn with_lookup_batch_limit(mut self, limit: usize) -> Self {
        self.lookup_batch_limit = limit;
        self
    }

    /// Set the first allocated id
    pub fn with_first_allocated_id(mut self, id: i64) -> Self {
        self.first_allocated_id = id;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.page_size == 0 {
            return Err("page_size must be greater than 0".to_string());
        }

        if self.lookup_batch_limit == 0 {
            return Err("lookup_batch_limit must be greater than 0".to_string());
        }

        if self.first_allocated_id < 1 {
            return Err("first_allocated_id must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmulatorConfig::default();
        assert_eq!(config.page_size, 300);
        assert_eq!(config.lookup_batch_limit, 1000);
        assert_eq!(config.first_allocated_id, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = EmulatorConfig::new()
            .with_page_size(2)
            .with_lookup_batch_limit(5)
            .with_first_allocated_id(100);

        assert_eq!(config.page_size, 2);
        assert_eq!(config.lookup_batch_limit, 5);
        assert_eq!(config.first_allocated_id, 100);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        assert!(EmulatorConfig::new().with_page_size(0).validate().is_err());
        assert!(EmulatorConfig::new().with_lookup_batch_limit(0).validate().is_err());
        assert!(EmulatorConfig::new().with_first_allocated_id(0).validate().is_err());
    }
}
