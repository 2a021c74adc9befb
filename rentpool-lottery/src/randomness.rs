use crate::{LotteryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentpool_core::{RandomnessRequest, RequestHandle, RequestStatus, RoundId};
use std::collections::BTreeMap;

/// External source of verifiable randomness. Values come back later through
/// `LotteryService::deliver_randomness`, correlated by the returned handle.
#[async_trait]
pub trait RandomnessProvider: Send + Sync {
    async fn request(&self, round: RoundId, count: u32) -> Result<RequestHandle>;
}

/// Correlates outstanding requests with rounds. No entropy of its own.
pub struct RandomnessGateway<'a> {
    requests: &'a mut BTreeMap<RequestHandle, RandomnessRequest>,
}

impl<'a> RandomnessGateway<'a> {
    pub fn new(requests: &'a mut BTreeMap<RequestHandle, RandomnessRequest>) -> Self {
        Self { requests }
    }

    pub fn outstanding_for(&self, round: RoundId) -> Option<&RandomnessRequest> {
        outstanding_for(&*self.requests, round)
    }

    pub fn register(
        &mut self,
        handle: RequestHandle,
        round: RoundId,
        count: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.requests.contains_key(&handle) {
            return Err(LotteryError::internal(format!(
                "Provider reused randomness handle {}",
                handle
            )));
        }

        if self.outstanding_for(round).is_some() {
            return Err(LotteryError::RequestOutstanding(round));
        }

        self.requests.insert(
            handle,
            RandomnessRequest {
                handle,
                round,
                count,
                requested_at: now,
                status: RequestStatus::Pending,
            },
        );

        tracing::info!(
            "Requested {} random values for round {} (handle {})",
            count,
            round,
            handle
        );
        Ok(())
    }

    /// Validate a delivery and consume its handle. Returns the round it belongs to.
    pub fn accept(&mut self, handle: RequestHandle, values: &[u64]) -> Result<RoundId> {
        let request = self
            .requests
            .get_mut(&handle)
            .ok_or(LotteryError::UnknownRequest(handle))?;

        if request.status != RequestStatus::Pending {
            return Err(LotteryError::RequestConsumed(handle));
        }

        if values.len() != request.count as usize {
            return Err(LotteryError::RandomnessCountMismatch {
                expected: request.count,
                got: values.len(),
            });
        }

        request.status = RequestStatus::Fulfilled;
        Ok(request.round)
    }

    pub fn abandon(&mut self, handle: RequestHandle) -> Result<()> {
        let request = self
            .requests
            .get_mut(&handle)
            .ok_or(LotteryError::UnknownRequest(handle))?;

        if request.status == RequestStatus::Pending {
            request.status = RequestStatus::Abandoned;
            tracing::warn!(
                "Abandoned randomness request {} for round {}",
                handle,
                request.round
            );
        }

        Ok(())
    }
}

pub(crate) fn outstanding_for(
    requests: &BTreeMap<RequestHandle, RandomnessRequest>,
    round: RoundId,
) -> Option<&RandomnessRequest> {
    requests
        .values()
        .find(|r| r.round == round && r.status == RequestStatus::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_outstanding_request_per_round() {
        let mut requests = BTreeMap::new();
        let mut gateway = RandomnessGateway::new(&mut requests);
        let now = Utc::now();

        gateway
            .register(RequestHandle::new(), RoundId(1), 2, now)
            .unwrap();
        let err = gateway
            .register(RequestHandle::new(), RoundId(1), 2, now)
            .unwrap_err();
        assert!(matches!(err, LotteryError::RequestOutstanding(RoundId(1))));

        // a different round is independent
        gateway
            .register(RequestHandle::new(), RoundId(2), 1, now)
            .unwrap();
    }

    #[test]
    fn test_accept_checks_handle_and_length() {
        let mut requests = BTreeMap::new();
        let mut gateway = RandomnessGateway::new(&mut requests);
        let handle = RequestHandle::new();
        gateway.register(handle, RoundId(1), 2, Utc::now()).unwrap();

        assert!(matches!(
            gateway.accept(RequestHandle::new(), &[1, 2]),
            Err(LotteryError::UnknownRequest(_))
        ));
        assert!(matches!(
            gateway.accept(handle, &[1]),
            Err(LotteryError::RandomnessCountMismatch {
                expected: 2,
                got: 1
            })
        ));

        assert_eq!(gateway.accept(handle, &[1, 2]).unwrap(), RoundId(1));
        assert!(matches!(
            gateway.accept(handle, &[1, 2]),
            Err(LotteryError::RequestConsumed(_))
        ));
    }

    #[test]
    fn test_abandoned_handle_cannot_deliver() {
        let mut requests = BTreeMap::new();
        let mut gateway = RandomnessGateway::new(&mut requests);
        let handle = RequestHandle::new();
        gateway.register(handle, RoundId(3), 1, Utc::now()).unwrap();
        gateway.abandon(handle).unwrap();

        assert!(gateway.outstanding_for(RoundId(3)).is_none());
        assert!(matches!(
            gateway.accept(handle, &[9]),
            Err(LotteryError::RequestConsumed(_))
        ));
    }
}
