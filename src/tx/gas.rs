//! Gas price and gas limit resolution for bridge votes
//!
//! Resolution runs in stages, each of which may fail without aborting the
//! write: the gas station oracle supplies the price, a chain estimate scaled
//! by the configured multiplier supplies the limit, and the chain
//! configuration supplies both whenever an earlier stage could not.

use super::pricer::GasPrice;
use super::transactor::TransactOptions;
use crate::config::{ChainConfig, GasEstimationPolicy};
use crate::error::RelayerResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed-point scale applied to the gas multiplier before integer math
const MULTIPLIER_SCALE: u64 = 1_000_000;

const WEI_PER_GWEI: f64 = 1_000_000_000.0;

/// Exact call that the vote transaction will make
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallParameters {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl CallParameters {
    pub fn to_transaction(&self) -> TypedTransaction {
        TransactionRequest::new()
            .from(self.from)
            .to(self.to)
            .data(self.data.clone())
            .value(self.value)
            .into()
    }
}

/// Chain-side gas estimation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasEstimator: Send + Sync {
    async fn estimate_gas(&self, call: &CallParameters) -> RelayerResult<U256>;
}

/// Failure of one stage of the gas station lookup
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("failed to decode body: {0}")]
    Decode(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("unexpected shape: {0}")]
    Shape(String),

    #[error("invalid fee value: {0}")]
    InvalidFee(String),
}

impl OracleError {
    pub fn stage(&self) -> &'static str {
        match self {
            OracleError::Request(_) => "request",
            OracleError::Status(_) => "status",
            OracleError::Decode(_) => "decode",
            OracleError::MissingField(_) | OracleError::Shape(_) => "shape",
            OracleError::InvalidFee(_) => "fee",
        }
    }
}

/// Fee field that gas stations report either as a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FeeValue {
    Number(f64),
    Text(String),
}

impl FeeValue {
    /// Interpret the value as gwei and convert it to wei, truncating fractions of a wei
    pub fn to_wei(&self) -> Result<U256, OracleError> {
        let gwei = self.gwei()?;
        if !gwei.is_finite() || gwei <= 0.0 {
            return Err(OracleError::InvalidFee(format!("{} gwei", gwei)));
        }

        let wei = (gwei * WEI_PER_GWEI).floor();
        if wei < 1.0 || wei >= u128::MAX as f64 {
            return Err(OracleError::InvalidFee(format!("{} gwei out of range", gwei)));
        }
        Ok(U256::from(wei as u128))
    }

    /// Like [`FeeValue::to_wei`], but a zero fee is valid
    pub fn to_wei_or_zero(&self) -> Result<U256, OracleError> {
        if self.gwei()? == 0.0 {
            return Ok(U256::zero());
        }
        self.to_wei()
    }

    fn gwei(&self) -> Result<f64, OracleError> {
        match self {
            FeeValue::Number(n) => Ok(*n),
            FeeValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| OracleError::InvalidFee(format!("{:?}: {}", s, e))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FastTier {
    #[serde(rename = "maxFee")]
    max_fee: Option<FeeValue>,
    #[serde(rename = "maxPriorityFee")]
    max_priority_fee: Option<FeeValue>,
}

/// Fast-tier fees reported by the gas station, in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleQuote {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: Option<U256>,
}

/// Extract the fast tier from a decoded gas station body
pub fn parse_gas_station(body: &serde_json::Value) -> Result<OracleQuote, OracleError> {
    let fast = body.get("fast").ok_or(OracleError::MissingField("fast"))?;
    if !fast.is_object() {
        return Err(OracleError::Shape(format!("fast is not an object: {}", fast)));
    }

    let tier: FastTier =
        serde_json::from_value(fast.clone()).map_err(|e| OracleError::Shape(e.to_string()))?;

    let max_fee_per_gas = tier
        .max_fee
        .ok_or(OracleError::MissingField("fast.maxFee"))?
        .to_wei()?;
    // An unusable tip only disables type-2 pricing, the fee cap still stands
    let max_priority_fee_per_gas = tier
        .max_priority_fee
        .and_then(|fee| match fee.to_wei_or_zero() {
            Ok(tip) => Some(tip),
            Err(e) => {
                warn!("Ignoring gas station maxPriorityFee: {}", e);
                None
            }
        });

    Ok(OracleQuote {
        max_fee_per_gas,
        max_priority_fee_per_gas,
    })
}

/// Source of current market gas prices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn fast_fees(&self) -> Result<OracleQuote, OracleError>;
}

/// Gas station reached over HTTP
pub struct HttpGasOracle {
    client: reqwest::Client,
    url: String,
}

impl HttpGasOracle {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl GasOracle for HttpGasOracle {
    async fn fast_fees(&self) -> Result<OracleQuote, OracleError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OracleError::Decode(e.to_string()))?;

        parse_gas_station(&body)
    }
}

/// Where a resolved gas value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasSource {
    Oracle,
    Estimated,
    Configured,
}

impl GasSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GasSource::Oracle => "oracle",
            GasSource::Estimated => "estimated",
            GasSource::Configured => "configured",
        }
    }
}

/// Resolved gas parameters for one vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasParameters {
    pub gas_limit: u64,
    pub gas_price: GasPrice,
    pub limit_source: GasSource,
    pub price_source: GasSource,
}

impl GasParameters {
    pub fn into_options(self) -> TransactOptions {
        TransactOptions {
            gas_limit: self.gas_limit,
            gas_price: Some(self.gas_price),
            value: U256::zero(),
            ..Default::default()
        }
    }
}

/// `floor(estimate * multiplier)`, or `None` if the product is zero
pub fn apply_multiplier(estimate: U256, multiplier: f64) -> Option<u64> {
    let scaled = (multiplier * MULTIPLIER_SCALE as f64).round();
    if !scaled.is_finite() || scaled < 1.0 || scaled > u64::MAX as f64 {
        return None;
    }

    let limit = estimate.checked_mul(U256::from(scaled as u64))? / U256::from(MULTIPLIER_SCALE);
    if limit.is_zero() {
        return None;
    }
    Some(if limit > U256::from(u64::MAX) {
        u64::MAX
    } else {
        limit.as_u64()
    })
}

/// Multi-stage gas resolution: oracle, then estimation, then configuration
pub struct GasStationResolver {
    domain_id: u8,
    oracle: Option<Arc<dyn GasOracle>>,
    estimator: Arc<dyn GasEstimator>,
    policy: GasEstimationPolicy,
    multiplier: f64,
    dynamic_fees: bool,
    fallback_gas_limit: u64,
    fallback_gas_price: U256,
}

impl GasStationResolver {
    pub fn new(
        config: &ChainConfig,
        oracle: Option<Arc<dyn GasOracle>>,
        estimator: Arc<dyn GasEstimator>,
    ) -> Self {
        Self {
            domain_id: config.domain_id,
            oracle,
            estimator,
            policy: config.gas_estimation,
            multiplier: config.gas_multiplier,
            dynamic_fees: config.dynamic_fees,
            fallback_gas_limit: config.gas_limit,
            fallback_gas_price: U256::from(config.max_gas_price),
        }
    }

    /// Resolve gas for `call`; `None` means no calldata could be built, so
    /// estimation is skipped. Never fails.
    pub async fn resolve(&self, call: Option<&CallParameters>) -> GasParameters {
        let quote = self.lookup_oracle().await;

        let (gas_price, price_source) = match quote {
            Some(quote) => (self.quote_to_price(quote), GasSource::Oracle),
            None => (
                GasPrice::Legacy(self.fallback_gas_price),
                GasSource::Configured,
            ),
        };

        let estimate = match self.policy {
            GasEstimationPolicy::AfterOracle => quote.is_some(),
            GasEstimationPolicy::Always => true,
            GasEstimationPolicy::Never => false,
        };

        let (gas_limit, limit_source) = match (estimate, call) {
            (true, Some(call)) => match self.estimate_limit(call).await {
                Some(limit) => (limit, GasSource::Estimated),
                None => (self.fallback_gas_limit, GasSource::Configured),
            },
            (true, None) => {
                warn!(
                    domain_id = self.domain_id,
                    "No calldata to estimate, using configured gas limit"
                );
                (self.fallback_gas_limit, GasSource::Configured)
            }
            (false, _) => (self.fallback_gas_limit, GasSource::Configured),
        };

        crate::metrics::record_gas_resolution(self.domain_id, "price", price_source);
        crate::metrics::record_gas_resolution(self.domain_id, "limit", limit_source);

        debug!(
            domain_id = self.domain_id,
            gas_limit,
            gas_price = %gas_price.max_per_gas(),
            price_source = price_source.as_str(),
            limit_source = limit_source.as_str(),
            "Resolved gas parameters"
        );

        GasParameters {
            gas_limit,
            gas_price,
            limit_source,
            price_source,
        }
    }

    async fn lookup_oracle(&self) -> Option<OracleQuote> {
        let oracle = self.oracle.as_ref()?;
        match oracle.fast_fees().await {
            Ok(quote) => Some(quote),
            Err(e) => {
                warn!(
                    domain_id = self.domain_id,
                    stage = e.stage(),
                    "Gas station lookup failed, using configured gas price: {}",
                    e
                );
                None
            }
        }
    }

    fn quote_to_price(&self, quote: OracleQuote) -> GasPrice {
        match quote.max_priority_fee_per_gas {
            Some(tip) if self.dynamic_fees => GasPrice::Eip1559 {
                max_fee_per_gas: quote.max_fee_per_gas,
                max_priority_fee_per_gas: tip.min(quote.max_fee_per_gas),
            },
            _ => GasPrice::Legacy(quote.max_fee_per_gas),
        }
    }

    async fn estimate_limit(&self, call: &CallParameters) -> Option<u64> {
        let estimate = match self.estimator.estimate_gas(call).await {
            Ok(estimate) => estimate,
            Err(e) => {
                warn!(
                    domain_id = self.domain_id,
                    "Gas estimation failed, using configured gas limit: {}", e
                );
                return None;
            }
        };

        let limit = apply_multiplier(estimate, self.multiplier);
        if limit.is_none() {
            warn!(
                domain_id = self.domain_id,
                %estimate,
                "Unusable gas estimate, using configured gas limit"
            );
        }
        limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayerError;

    use axum::{routing::get, Router};
    use serde_json::json;

    fn chain_config(policy: GasEstimationPolicy) -> ChainConfig {
        let mut config = ChainConfig::for_tests(2);
        config.gas_limit = 3_000_000;
        config.gas_estimation = policy;
        config
    }

    fn call() -> CallParameters {
        CallParameters {
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0x0b),
            data: Bytes::from(vec![1, 2, 3]),
            value: U256::zero(),
        }
    }

    /// Serve `body` on an ephemeral local port, returning its URL
    async fn serve(body: &'static str) -> String {
        let app = Router::new().route("/gas", get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/gas", addr)
    }

    fn http_oracle(url: &str) -> Option<Arc<dyn GasOracle>> {
        Some(Arc::new(
            HttpGasOracle::new(url, Duration::from_secs(2)).unwrap(),
        ))
    }

    fn estimator_returning(estimate: u64) -> Arc<dyn GasEstimator> {
        let mut estimator = MockGasEstimator::new();
        estimator
            .expect_estimate_gas()
            .times(1)
            .returning(move |_| Ok(U256::from(estimate)));
        Arc::new(estimator)
    }

    fn estimator_never_called() -> Arc<dyn GasEstimator> {
        let mut estimator = MockGasEstimator::new();
        estimator.expect_estimate_gas().times(0);
        Arc::new(estimator)
    }

    #[test]
    fn test_string_and_number_fees_normalize_identically() {
        let from_text = parse_gas_station(&json!({"fast": {"maxFee": "123.0"}})).unwrap();
        let from_number = parse_gas_station(&json!({"fast": {"maxFee": 123.0}})).unwrap();

        let expected = U256::from(123u64) * U256::exp10(9);
        assert_eq!(from_text.max_fee_per_gas, expected);
        assert_eq!(from_number.max_fee_per_gas, expected);
        assert_eq!(from_text.max_priority_fee_per_gas, None);
    }

    #[test]
    fn test_fractional_gwei_and_priority_fee() {
        let quote = parse_gas_station(&json!({
            "fast": {"maxFee": 31.5, "maxPriorityFee": "1.25"}
        }))
        .unwrap();
        assert_eq!(quote.max_fee_per_gas, U256::from(31_500_000_000u64));
        assert_eq!(
            quote.max_priority_fee_per_gas,
            Some(U256::from(1_250_000_000u64))
        );
    }

    #[test]
    fn test_zero_or_malformed_tip_keeps_fee_cap() {
        let zero_tip =
            parse_gas_station(&json!({"fast": {"maxFee": "30", "maxPriorityFee": 0}})).unwrap();
        assert_eq!(zero_tip.max_fee_per_gas, U256::from(30_000_000_000u64));
        assert_eq!(zero_tip.max_priority_fee_per_gas, Some(U256::zero()));

        let bad_tip =
            parse_gas_station(&json!({"fast": {"maxFee": 30, "maxPriorityFee": "n/a"}})).unwrap();
        assert_eq!(bad_tip.max_fee_per_gas, U256::from(30_000_000_000u64));
        assert_eq!(bad_tip.max_priority_fee_per_gas, None);
    }

    #[test]
    fn test_malformed_bodies_are_errors() {
        let cases = [
            (json!({}), "shape"),
            (json!({"fast": 12}), "shape"),
            (json!({"fast": {}}), "shape"),
            (json!({"fast": {"maxFee": true}}), "shape"),
            (json!({"fast": {"maxFee": "fast"}}), "fee"),
            (json!({"fast": {"maxFee": -3}}), "fee"),
            (json!({"fast": {"maxFee": 0}}), "fee"),
        ];
        for (body, stage) in cases {
            let err = parse_gas_station(&body).unwrap_err();
            assert_eq!(err.stage(), stage, "body {}", body);
        }
    }

    #[test]
    fn test_multiplier_floors_product() {
        assert_eq!(apply_multiplier(U256::from(21_000), 10.0), Some(210_000));
        assert_eq!(apply_multiplier(U256::from(33_333), 1.5), Some(49_999));
        assert_eq!(apply_multiplier(U256::zero(), 10.0), None);
        assert_eq!(apply_multiplier(U256::MAX, 10.0), None);
        assert_eq!(
            apply_multiplier(U256::from(u64::MAX), 2.0),
            Some(u64::MAX)
        );
    }

    #[tokio::test]
    async fn test_oracle_success_estimates_and_multiplies() {
        let url = serve(r#"{"fast":{"maxFee":"123.0","maxPriorityFee":2}}"#).await;
        let config = chain_config(GasEstimationPolicy::AfterOracle);
        let resolver =
            GasStationResolver::new(&config, http_oracle(&url), estimator_returning(50_000));

        let params = resolver.resolve(Some(&call())).await;
        assert_eq!(
            params.gas_price,
            GasPrice::Legacy(U256::from(123_000_000_000u64))
        );
        assert_eq!(params.gas_limit, 500_000);
        assert_eq!(params.price_source, GasSource::Oracle);
        assert_eq!(params.limit_source, GasSource::Estimated);
    }

    #[tokio::test]
    async fn test_unreachable_oracle_falls_back_to_config() {
        let config = chain_config(GasEstimationPolicy::AfterOracle);
        let resolver = GasStationResolver::new(
            &config,
            http_oracle("http://127.0.0.1:1/gas"),
            estimator_never_called(),
        );

        let params = resolver.resolve(Some(&call())).await;
        assert_eq!(
            params,
            GasParameters {
                gas_limit: 3_000_000,
                gas_price: GasPrice::Legacy(U256::from(20_000_000_000u64)),
                limit_source: GasSource::Configured,
                price_source: GasSource::Configured,
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_oracle_body_falls_back_to_config() {
        let url = serve("<html>rate limited</html>").await;
        let config = chain_config(GasEstimationPolicy::AfterOracle);
        let resolver =
            GasStationResolver::new(&config, http_oracle(&url), estimator_never_called());

        let params = resolver.resolve(Some(&call())).await;
        assert_eq!(params.gas_limit, 3_000_000);
        assert_eq!(
            params.gas_price,
            GasPrice::Legacy(U256::from(20_000_000_000u64))
        );
    }

    #[tokio::test]
    async fn test_always_policy_estimates_without_oracle() {
        let config = chain_config(GasEstimationPolicy::Always);
        let resolver = GasStationResolver::new(&config, None, estimator_returning(40_000));

        let params = resolver.resolve(Some(&call())).await;
        assert_eq!(params.gas_limit, 400_000);
        assert_eq!(params.price_source, GasSource::Configured);
    }

    #[tokio::test]
    async fn test_never_policy_skips_estimation() {
        let mut oracle = MockGasOracle::new();
        oracle.expect_fast_fees().returning(|| {
            Ok(OracleQuote {
                max_fee_per_gas: U256::from(99),
                max_priority_fee_per_gas: None,
            })
        });
        let config = chain_config(GasEstimationPolicy::Never);
        let resolver =
            GasStationResolver::new(&config, Some(Arc::new(oracle)), estimator_never_called());

        let params = resolver.resolve(Some(&call())).await;
        assert_eq!(params.gas_price, GasPrice::Legacy(U256::from(99)));
        assert_eq!(params.gas_limit, 3_000_000);
    }

    #[tokio::test]
    async fn test_estimation_failure_keeps_oracle_price() {
        let mut oracle = MockGasOracle::new();
        oracle.expect_fast_fees().returning(|| {
            Ok(OracleQuote {
                max_fee_per_gas: U256::from(77),
                max_priority_fee_per_gas: None,
            })
        });
        let mut estimator = MockGasEstimator::new();
        estimator
            .expect_estimate_gas()
            .returning(|_| Err(RelayerError::GasEstimation("execution reverted".into())));

        let config = chain_config(GasEstimationPolicy::AfterOracle);
        let resolver =
            GasStationResolver::new(&config, Some(Arc::new(oracle)), Arc::new(estimator));

        let params = resolver.resolve(Some(&call())).await;
        assert_eq!(params.gas_price, GasPrice::Legacy(U256::from(77)));
        assert_eq!(params.gas_limit, 3_000_000);
        assert_eq!(params.limit_source, GasSource::Configured);
    }

    #[tokio::test]
    async fn test_zero_tip_uses_oracle_price() {
        let url = serve(r#"{"fast":{"maxFee":"30","maxPriorityFee":0}}"#).await;
        let resolver = GasStationResolver::new(
            &chain_config(GasEstimationPolicy::Never),
            http_oracle(&url),
            estimator_never_called(),
        );

        let params = resolver.resolve(Some(&call())).await;
        assert_eq!(params.price_source, GasSource::Oracle);
        assert_eq!(
            params.gas_price,
            GasPrice::Legacy(U256::from(30_000_000_000u64))
        );
    }

    #[tokio::test]
    async fn test_dynamic_fees_build_type_two_price() {
        let mut oracle = MockGasOracle::new();
        oracle.expect_fast_fees().returning(|| {
            Ok(OracleQuote {
                max_fee_per_gas: U256::from(100),
                max_priority_fee_per_gas: Some(U256::from(3)),
            })
        });
        let mut config = chain_config(GasEstimationPolicy::Never);
        config.dynamic_fees = true;
        let resolver =
            GasStationResolver::new(&config, Some(Arc::new(oracle)), estimator_never_called());

        let params = resolver.resolve(None).await;
        assert_eq!(
            params.gas_price,
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(100),
                max_priority_fee_per_gas: U256::from(3),
            }
        );
    }
}
