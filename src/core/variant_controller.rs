// Variant controller: owns the single estimator instance and replaces it on variant switches

use crate::models::pose::{EstimatorOptions, PoseError, PoseResult, Variant};
use crate::platform::pose::{EstimatorFactory, PoseEstimator};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Holds at most one estimator, always bound to the active variant.
///
/// While a detection step runs the estimator is lent out and must be
/// restored before it can be disposed or replaced.
pub struct VariantController {
    factory: Arc<dyn EstimatorFactory>,
    options: EstimatorOptions,
    active: Variant,
    estimator: Option<Box<dyn PoseEstimator>>,
    lent: bool,
}

impl VariantController {
    pub fn new(factory: Arc<dyn EstimatorFactory>, variant: Variant, options: EstimatorOptions) -> Self {
        Self {
            factory,
            options,
            active: variant,
            estimator: None,
            lent: false,
        }
    }

    pub fn active(&self) -> Variant {
        self.active
    }

    /// True if an estimator exists, including one currently lent out
    pub fn has_estimator(&self) -> bool {
        self.estimator.is_some() || self.lent
    }

    /// Create the estimator for the active variant if there is none
    pub async fn ensure(&mut self) -> PoseResult<()> {
        if self.has_estimator() {
            return Ok(());
        }
        let estimator = self.factory.create(self.active, &self.options).await?;
        info!(variant = %self.active, backend = self.factory.name(), "Estimator created");
        self.estimator = Some(estimator);
        Ok(())
    }

    /// Point the factory at another backend. Takes effect on the next creation.
    pub fn set_backend_url(&self, url: Option<&str>) {
        self.factory.set_base_url(url);
    }

    /// Take the estimator for one detection step
    pub fn lend(&mut self) -> Option<Box<dyn PoseEstimator>> {
        let estimator = self.estimator.take()?;
        self.lent = true;
        Some(estimator)
    }

    /// Return an estimator taken with `lend`
    pub fn restore(&mut self, estimator: Box<dyn PoseEstimator>) {
        debug_assert!(self.estimator.is_none());
        self.lent = false;
        self.estimator = Some(estimator);
    }

    /// Dispose the current estimator and create one for `variant`.
    ///
    /// Disposal errors are logged and suppressed. The variant becomes active
    /// even when creation fails, so a later `ensure` retries it.
    pub async fn switch(&mut self, variant: Variant) -> PoseResult<()> {
        if self.lent {
            return Err(PoseError::InvalidConfig(
                "cannot switch variant while a detection step holds the estimator".to_string(),
            ));
        }

        self.dispose().await;
        let previous = std::mem::replace(&mut self.active, variant);
        debug!(from = %previous, to = %variant, "Switching variant");
        self.ensure().await
    }

    /// Dispose the current estimator, if any
    pub async fn dispose(&mut self) {
        if let Some(estimator) = self.estimator.take() {
            let variant = estimator.variant();
            match estimator.dispose().await {
                Ok(()) => info!(variant = %variant, "Estimator disposed"),
                Err(e) => warn!(variant = %variant, "Estimator disposal failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;

    fn controller(factory: &ScriptedFactory) -> VariantController {
        VariantController::new(
            Arc::new(factory.clone()),
            Variant::SingleposeLightning,
            EstimatorOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_ensure_creates_lazily_once() {
        let factory = ScriptedFactory::new();
        let mut variants = controller(&factory);
        assert!(!variants.has_estimator());

        variants.ensure().await.unwrap();
        variants.ensure().await.unwrap();
        assert_eq!(factory.created(), vec![Variant::SingleposeLightning]);
        assert_eq!(factory.live(), 1);
    }

    #[tokio::test]
    async fn test_switch_never_holds_two_estimators() {
        let factory = ScriptedFactory::new();
        let mut variants = controller(&factory);
        variants.ensure().await.unwrap();

        for variant in [
            Variant::SingleposeThunder,
            Variant::MultiposeLightning,
            Variant::MultiposeLightning,
        ] {
            variants.switch(variant).await.unwrap();
            assert_eq!(variants.active(), variant);
            assert_eq!(factory.live(), 1);
        }
        assert_eq!(factory.max_live(), 1);
        assert_eq!(factory.created().len(), 4);
    }

    #[tokio::test]
    async fn test_switch_suppresses_dispose_errors() {
        let factory = ScriptedFactory::new().failing_dispose();
        let mut variants = controller(&factory);
        variants.ensure().await.unwrap();

        variants.switch(Variant::SingleposeThunder).await.unwrap();
        assert_eq!(variants.active(), Variant::SingleposeThunder);
        assert_eq!(factory.live(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_keeps_new_variant() {
        let factory = ScriptedFactory::new();
        let mut variants = controller(&factory);
        variants.ensure().await.unwrap();

        factory.fail_create(true);
        assert!(variants.switch(Variant::SingleposeThunder).await.is_err());
        assert_eq!(variants.active(), Variant::SingleposeThunder);
        assert!(!variants.has_estimator());
        assert_eq!(factory.live(), 0);

        factory.fail_create(false);
        variants.ensure().await.unwrap();
        assert_eq!(factory.created().last(), Some(&Variant::SingleposeThunder));
    }

    #[tokio::test]
    async fn test_switch_refused_while_lent() {
        let factory = ScriptedFactory::new();
        let mut variants = controller(&factory);
        variants.ensure().await.unwrap();

        let estimator = variants.lend().unwrap();
        assert!(variants.has_estimator());
        assert!(variants.switch(Variant::SingleposeThunder).await.is_err());

        variants.restore(estimator);
        variants.switch(Variant::SingleposeThunder).await.unwrap();
        assert_eq!(factory.max_live(), 1);
    }
}
