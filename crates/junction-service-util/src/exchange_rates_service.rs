use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, error, trace, warn};
use thiserror::Error;

use junction_packet::{ErrorCode, RejectBuilder};
use junction_service::{
    Account, AddressStore, IlpResult, OutgoingRequest, OutgoingService,
};

#[derive(Error, Debug)]
pub enum ExchangeRateStoreError {
    #[error("no exchange rate available for asset: {0}")]
    PairNotFound(String),
}

/// Quotes exchange rates for asset codes. Rates are relative to a common
/// base, so the pair rate is `rate(to) / rate(from)`. Reloads are atomic:
/// `set_exchange_rates` replaces the whole table at once.
pub trait ExchangeRateStore: Clone + Send + Sync + 'static {
    fn set_exchange_rates(&self, rates: HashMap<String, f64>);

    fn get_exchange_rates(&self, asset_codes: &[&str]) -> Result<Vec<f64>, ExchangeRateStoreError>;

    fn get_all_exchange_rates(&self) -> HashMap<String, f64>;
}

/// Scale-difference details for amount conversions.
#[derive(Debug)]
pub struct ConvertDetails {
    pub from: u8,
    pub to: u8,
}

/// Moves an amount between asset scales, erring on overflow.
pub trait Convert {
    type Item: Sized;

    fn normalize_scale(&self, details: ConvertDetails) -> Result<Self::Item, ()>;
}

impl Convert for u64 {
    type Item = u64;

    fn normalize_scale(&self, details: ConvertDetails) -> Result<u64, ()> {
        let scale_diff = (i32::from(details.from) - i32::from(details.to)).abs() as u32;
        let scale = 10u64.checked_pow(scale_diff).ok_or(())?;
        if details.to >= details.from {
            self.checked_mul(scale).ok_or(())
        } else {
            Ok(self / scale)
        }
    }
}

impl Convert for f64 {
    type Item = f64;

    fn normalize_scale(&self, details: ConvertDetails) -> Result<f64, ()> {
        let scale_diff = (i32::from(details.from) - i32::from(details.to)).abs() as u32;
        let scale = 10f64.powi(scale_diff as i32);
        let result = if details.to >= details.from {
            self * scale
        } else {
            self / scale
        };
        if result.is_finite() {
            Ok(result)
        } else {
            Err(())
        }
    }
}

/// Converts each outgoing Prepare's amount from the source account's asset
/// into the destination account's, applying the configured spread and the
/// scale difference. The conversion floors; a positive amount that floors to
/// zero is the sender's problem (R01), an amount too large for the wire is
/// theirs too (F08).
#[derive(Clone)]
pub struct ExchangeRateService<S, O> {
    spread: f64,
    store: S,
    next: O,
}

impl<S, O> ExchangeRateService<S, O> {
    pub fn new(spread: f64, store: S, next: O) -> Self {
        ExchangeRateService {
            spread,
            store,
            next,
        }
    }
}

#[async_trait]
impl<S, O, A> OutgoingService<A> for ExchangeRateService<S, O>
where
    S: AddressStore + ExchangeRateStore,
    O: OutgoingService<A> + Send + Sync,
    A: Account,
{
    async fn send_request(&mut self, mut request: OutgoingRequest<A>) -> IlpResult {
        if request.prepare.amount() > 0 {
            let ilp_address = self.store.get_ilp_address();
            let rate = if request.from.asset_code() == request.to.asset_code() {
                1.0
            } else {
                match self
                    .store
                    .get_exchange_rates(&[request.from.asset_code(), request.to.asset_code()])
                {
                    Ok(rates) => rates[1] / rates[0],
                    Err(err) => {
                        error!(
                            "No exchange rate available from {} to {}: {}",
                            request.from.asset_code(),
                            request.to.asset_code(),
                            err
                        );
                        // Rate backend failures are temporary; the sender may
                        // retry once rates are loaded.
                        return Err(RejectBuilder {
                            code: ErrorCode::T00_INTERNAL_ERROR,
                            message: format!(
                                "no exchange rate available from {} to {}",
                                request.from.asset_code(),
                                request.to.asset_code(),
                            )
                            .as_bytes(),
                            triggered_by: Some(&ilp_address),
                            data: &[],
                        }
                        .build());
                    }
                }
            };

            let rate = rate * (1.0 - self.spread);
            let rate = if rate.is_finite() && rate.is_sign_positive() {
                rate
            } else {
                warn!(
                    "Exchange rate would have been {} after spread, using 0.0 instead",
                    rate
                );
                0.0
            };

            let outgoing_amount = (request.prepare.amount() as f64) * rate;
            let outgoing_amount = outgoing_amount.normalize_scale(ConvertDetails {
                from: request.from.asset_scale(),
                to: request.to.asset_scale(),
            });

            match outgoing_amount {
                Ok(outgoing_amount) if outgoing_amount > u64::max_value() as f64 => {
                    return Err(RejectBuilder {
                        code: ErrorCode::F08_AMOUNT_TOO_LARGE,
                        message: format!(
                            "converted amount {} does not fit in the packet",
                            outgoing_amount,
                        )
                        .as_bytes(),
                        triggered_by: Some(&ilp_address),
                        data: &[],
                    }
                    .build());
                }
                Ok(outgoing_amount) => {
                    // Floor towards zero.
                    let outgoing_amount = outgoing_amount as u64;
                    if outgoing_amount == 0 {
                        debug!(
                            "Rejecting packet whose amount of {} {} converts to zero {}",
                            request.prepare.amount(),
                            request.from.asset_code(),
                            request.to.asset_code(),
                        );
                        return Err(RejectBuilder {
                            code: ErrorCode::R01_INSUFFICIENT_SOURCE_AMOUNT,
                            message: b"source amount is too small",
                            triggered_by: Some(&ilp_address),
                            data: &[],
                        }
                        .build());
                    }
                    request.prepare.set_amount(outgoing_amount);
                    trace!(
                        "Converted incoming amount of {} {} (scale {}) to outgoing amount of {} {} (scale {})",
                        request.original_amount,
                        request.from.asset_code(),
                        request.from.asset_scale(),
                        outgoing_amount,
                        request.to.asset_code(),
                        request.to.asset_scale(),
                    );
                }
                Err(()) => {
                    return Err(RejectBuilder {
                        code: ErrorCode::F08_AMOUNT_TOO_LARGE,
                        message: format!(
                            "could not convert {} from scale {} to scale {}",
                            request.prepare.amount(),
                            request.from.asset_scale(),
                            request.to.asset_scale(),
                        )
                        .as_bytes(),
                        triggered_by: Some(&ilp_address),
                        data: &[],
                    }
                    .build());
                }
            }
        }

        self.next.send_request(request).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use junction_packet::{Address, FulfillBuilder, PrepareBuilder};
    use junction_service::{outgoing_service_fn, AccountId, AddressStoreError};
    use parking_lot::RwLock;
    use std::str::FromStr;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    #[derive(Clone, Debug)]
    struct TestAccount {
        name: &'static str,
        asset_code: &'static str,
        asset_scale: u8,
    }

    impl Account for TestAccount {
        fn id(&self) -> AccountId {
            AccountId::from_str(self.name).unwrap()
        }

        fn ilp_address(&self) -> &Address {
            static ADDRESS: once_cell::sync::Lazy<Address> =
                once_cell::sync::Lazy::new(|| Address::new("example.account"));
            &ADDRESS
        }

        fn asset_code(&self) -> &str {
            self.asset_code
        }

        fn asset_scale(&self) -> u8 {
            self.asset_scale
        }
    }

    #[derive(Clone, Default)]
    struct TestStore {
        rates: Arc<RwLock<HashMap<String, f64>>>,
    }

    #[async_trait]
    impl AddressStore for TestStore {
        async fn set_ilp_address(&self, _: Address) -> Result<(), AddressStoreError> {
            unimplemented!()
        }

        async fn clear_ilp_address(&self) -> Result<(), AddressStoreError> {
            unimplemented!()
        }

        fn get_ilp_address(&self) -> Address {
            Address::new("example.connector")
        }
    }

    impl ExchangeRateStore for TestStore {
        fn set_exchange_rates(&self, rates: HashMap<String, f64>) {
            *self.rates.write() = rates;
        }

        fn get_exchange_rates(
            &self,
            asset_codes: &[&str],
        ) -> Result<Vec<f64>, ExchangeRateStoreError> {
            let rates = self.rates.read();
            asset_codes
                .iter()
                .map(|code| {
                    rates
                        .get(*code)
                        .copied()
                        .ok_or_else(|| ExchangeRateStoreError::PairNotFound(code.to_string()))
                })
                .collect()
        }

        fn get_all_exchange_rates(&self) -> HashMap<String, f64> {
            self.rates.read().clone()
        }
    }

    fn request(
        from_asset: (&'static str, u8),
        to_asset: (&'static str, u8),
        amount: u64,
    ) -> OutgoingRequest<TestAccount> {
        OutgoingRequest {
            from: TestAccount {
                name: "alice",
                asset_code: from_asset.0,
                asset_scale: from_asset.1,
            },
            to: TestAccount {
                name: "bob",
                asset_code: to_asset.0,
                asset_scale: to_asset.1,
            },
            original_amount: amount,
            prepare: PrepareBuilder {
                destination: Address::new("example.destination"),
                amount,
                expires_at: SystemTime::now() + Duration::from_secs(30),
                execution_condition: &[0; 32],
                data: b"",
            }
            .build(),
        }
    }

    fn capture_amounts() -> (
        Arc<RwLock<Vec<u64>>>,
        impl OutgoingService<TestAccount> + Clone + Send + Sync + 'static,
    ) {
        let amounts = Arc::new(RwLock::new(Vec::new()));
        let amounts_clone = amounts.clone();
        let service = outgoing_service_fn(move |request: OutgoingRequest<TestAccount>| {
            amounts_clone.write().push(request.prepare.amount());
            Ok(FulfillBuilder {
                fulfillment: &[0; 32],
                data: b"",
            }
            .build())
        });
        (amounts, service)
    }

    #[tokio::test]
    async fn same_asset_is_one_to_one() {
        let (amounts, next) = capture_amounts();
        let mut service = ExchangeRateService::new(0.0, TestStore::default(), next);
        service
            .send_request(request(("XYZ", 0), ("XYZ", 0), 100))
            .await
            .unwrap();
        assert_eq!(*amounts.read(), vec![100]);
    }

    #[tokio::test]
    async fn applies_rate_and_scale() {
        let store = TestStore::default();
        let mut rates = HashMap::new();
        rates.insert("ABC".to_string(), 1.0);
        rates.insert("XYZ".to_string(), 2.0);
        store.set_exchange_rates(rates);

        let (amounts, next) = capture_amounts();
        let mut service = ExchangeRateService::new(0.0, store, next);
        // 100 ABC at rate 2 = 200 XYZ; scale 0 -> 2 multiplies by 100.
        service
            .send_request(request(("ABC", 0), ("XYZ", 2), 100))
            .await
            .unwrap();
        assert_eq!(*amounts.read(), vec![20_000]);
    }

    #[tokio::test]
    async fn spread_shaves_the_outgoing_amount() {
        let store = TestStore::default();
        let mut rates = HashMap::new();
        rates.insert("ABC".to_string(), 1.0);
        rates.insert("XYZ".to_string(), 2.0);
        store.set_exchange_rates(rates);

        let (amounts, next) = capture_amounts();
        let mut service = ExchangeRateService::new(0.01, store, next);
        service
            .send_request(request(("ABC", 0), ("XYZ", 0), 100))
            .await
            .unwrap();
        assert_eq!(*amounts.read(), vec![198]);
    }

    #[tokio::test]
    async fn rejects_r01_when_amount_floors_to_zero() {
        let store = TestStore::default();
        let mut rates = HashMap::new();
        rates.insert("ABC".to_string(), 1.0);
        rates.insert("XYZ".to_string(), 0.001);
        store.set_exchange_rates(rates);

        let (_amounts, next) = capture_amounts();
        let mut service = ExchangeRateService::new(0.0, store, next);
        let reject = service
            .send_request(request(("ABC", 0), ("XYZ", 0), 100))
            .await
            .unwrap_err();
        assert_eq!(reject.code(), ErrorCode::R01_INSUFFICIENT_SOURCE_AMOUNT);
    }

    #[tokio::test]
    async fn rejects_t00_without_a_rate() {
        let (_amounts, next) = capture_amounts();
        let mut service = ExchangeRateService::new(0.0, TestStore::default(), next);
        let reject = service
            .send_request(request(("ABC", 0), ("XYZ", 0), 100))
            .await
            .unwrap_err();
        assert_eq!(reject.code(), ErrorCode::T00_INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn rejects_f08_on_overflowing_conversion() {
        let store = TestStore::default();
        let mut rates = HashMap::new();
        rates.insert("ABC".to_string(), 1.0);
        rates.insert("XYZ".to_string(), 1.0e300);
        store.set_exchange_rates(rates);

        let (_amounts, next) = capture_amounts();
        let mut service = ExchangeRateService::new(0.0, store, next);
        let reject = service
            .send_request(request(("ABC", 0), ("XYZ", 0), u64::max_value()))
            .await
            .unwrap_err();
        assert_eq!(reject.code(), ErrorCode::F08_AMOUNT_TOO_LARGE);
    }

    #[tokio::test]
    async fn zero_amount_packets_pass_untouched() {
        let (amounts, next) = capture_amounts();
        let mut service = ExchangeRateService::new(0.0, TestStore::default(), next);
        service
            .send_request(request(("ABC", 0), ("XYZ", 0), 0))
            .await
            .unwrap();
        assert_eq!(*amounts.read(), vec![0]);
    }
}
