// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine configuration.

/// Tunables for an [`Engine`](crate::Engine).
///
/// ```rust
/// use understory_cascade::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .implicit_styles(false)
///     .max_template_depth(8)
///     .build();
/// assert!(!config.implicit_styles());
/// assert_eq!(config.max_template_depth(), 8);
/// assert!(!config.record_invalidations());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    implicit_styles: bool,
    max_template_depth: usize,
    record_invalidations: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            implicit_styles: true,
            max_template_depth: 32,
            record_invalidations: false,
        }
    }
}

impl EngineConfig {
    /// Starts a builder from the defaults.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether nodes without an explicit style pick up type-keyed styles
    /// from resource dictionaries.
    #[must_use]
    #[inline]
    pub fn implicit_styles(&self) -> bool {
        self.implicit_styles
    }

    /// How many templates may nest inside one another.
    #[must_use]
    #[inline]
    pub fn max_template_depth(&self) -> usize {
        self.max_template_depth
    }

    /// Whether reverse-index invalidations are logged.
    ///
    /// See [`Engine::invalidation_log`](crate::Engine::invalidation_log).
    #[must_use]
    #[inline]
    pub fn record_invalidations(&self) -> bool {
        self.record_invalidations
    }
}

/// Builder for [`EngineConfig`].
#[derive(Clone, Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Enables or disables implicit style lookup.
    #[must_use]
    pub fn implicit_styles(mut self, enabled: bool) -> Self {
        self.config.implicit_styles = enabled;
        self
    }

    /// Sets the template nesting limit.
    #[must_use]
    pub fn max_template_depth(mut self, depth: usize) -> Self {
        self.config.max_template_depth = depth;
        self
    }

    /// Enables or disables the invalidation log.
    #[must_use]
    pub fn record_invalidations(mut self, enabled: bool) -> Self {
        self.config.record_invalidations = enabled;
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
