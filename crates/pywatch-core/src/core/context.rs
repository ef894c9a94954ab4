use std::time::Duration;

use super::config::Config;
use super::effects::Effects;

/// Borrowed view of everything a component needs: the side-effect seam and
/// the resolved configuration.
#[derive(Clone, Copy)]
pub struct WatchContext<'a> {
    effects: &'a dyn Effects,
    config: &'a Config,
}

impl<'a> WatchContext<'a> {
    #[must_use]
    pub fn new(effects: &'a dyn Effects, config: &'a Config) -> Self {
        Self { effects, config }
    }

    #[must_use]
    pub fn effects(&self) -> &'a dyn Effects {
        self.effects
    }

    #[must_use]
    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub(crate) fn http_timeout(&self) -> Duration {
        self.config.timing().http_timeout
    }
}
