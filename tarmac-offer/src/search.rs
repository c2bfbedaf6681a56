use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tarmac_catalog::{
    FlightInventory, InventoryManager, PricingEngine, PricingError, QuoteRequest, QuoteSegment, SeatRequest,
};
use tarmac_core::search::{FlightOption, FlightSearchRequest, FlightSearchResult, PassengerFare};
use tarmac_core::{CoreError, CoreResult, ItineraryRef, SegmentRef};
use tracing::{debug, info, warn};

use crate::cache::{cache_key, AvailabilityCache, Freshness};

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub cache_key: String,
    pub freshness: Freshness,
    pub result: FlightSearchResult,
}

/// Priced availability search. Reads through the cache; on a miss it asks
/// the inventory manager and the pricing engine and refreshes the cache.
pub struct SearchService {
    inventory: Arc<InventoryManager>,
    pricing: Arc<PricingEngine>,
    cache: Arc<AvailabilityCache>,
}

impl SearchService {
    pub fn new(inventory: Arc<InventoryManager>, pricing: Arc<PricingEngine>, cache: Arc<AvailabilityCache>) -> Self {
        Self {
            inventory,
            pricing,
            cache,
        }
    }

    /// `allow_stale` lets a stale entry answer the search (flagged as such)
    /// instead of recomputing, and lets it stand in when recomputation fails.
    pub async fn search(&self, request: &FlightSearchRequest, allow_stale: bool) -> CoreResult<SearchOutcome> {
        request.validate()?;
        let key = cache_key(request);

        let cached = match self.cache.lookup(&key).await {
            Ok(lookup) => lookup,
            Err(err) => {
                warn!(key = %key, "cache lookup failed, searching live: {}", err);
                crate::cache::CacheLookup {
                    data: None,
                    freshness: Freshness::Expired,
                }
            }
        };

        match (cached.freshness, cached.data) {
            (Freshness::Valid, Some(result)) => {
                return Ok(SearchOutcome {
                    cache_key: key,
                    freshness: Freshness::Valid,
                    result,
                })
            }
            (Freshness::Stale, Some(result)) if allow_stale => {
                return Ok(SearchOutcome {
                    cache_key: key,
                    freshness: Freshness::Stale,
                    result,
                })
            }
            (_, stale) => match self.compute(request).await {
                Ok(result) => {
                    if let Err(err) = self.cache.refresh(&key, result.clone(), None).await {
                        warn!(key = %key, "cache refresh failed: {}", err);
                    }
                    Ok(SearchOutcome {
                        cache_key: key,
                        freshness: Freshness::Valid,
                        result,
                    })
                }
                Err(err) => match stale {
                    Some(result) if allow_stale => {
                        warn!(key = %key, "live search failed, serving stale results: {}", err);
                        Ok(SearchOutcome {
                            cache_key: key,
                            freshness: Freshness::Stale,
                            result,
                        })
                    }
                    _ => Err(err),
                },
            },
        }
    }

    async fn compute(&self, request: &FlightSearchRequest) -> CoreResult<FlightSearchResult> {
        let mut legs = vec![self.leg(request, &request.origin, &request.destination, request.departure_date).await?];
        if let Some(back) = request.return_date {
            legs.push(self.leg(request, &request.destination, &request.origin, back).await?);
        }
        info!(
            origin = %request.origin,
            destination = %request.destination,
            options = legs.iter().map(Vec::len).sum::<usize>(),
            "live availability search"
        );
        Ok(FlightSearchResult { legs })
    }

    async fn leg(
        &self,
        request: &FlightSearchRequest,
        origin: &str,
        destination: &str,
        date: NaiveDate,
    ) -> CoreResult<Vec<FlightOption>> {
        let flights = self.inventory.list_route(origin, destination, date).await?;
        let mut options = Vec::new();
        for flight in &flights {
            options.extend(self.price_flight(request, flight)?);
        }
        options.sort_by(|a, b| a.total_fare.cmp(&b.total_fare));
        Ok(options)
    }

    fn price_flight(&self, request: &FlightSearchRequest, flight: &FlightInventory) -> CoreResult<Vec<FlightOption>> {
        let seated = request.passengers.seated().max(1) as i32;
        let passengers = request.passengers.expand();
        let mut options = Vec::new();

        for bucket in flight
            .buckets
            .iter()
            .filter(|b| request.cabin.map_or(true, |c| c == b.cabin))
        {
            let seat_request = SeatRequest {
                seats: seated,
                cabin: Some(bucket.cabin),
                booking_class: Some(bucket.booking_class.clone()),
            };
            if !flight.is_available(&seat_request) {
                continue;
            }

            let segment = SegmentRef {
                flight: flight.key.clone(),
                cabin: bucket.cabin,
                booking_class: bucket.booking_class.clone(),
            };
            let quote = self.pricing.quote(&QuoteRequest {
                segments: vec![QuoteSegment {
                    segment: segment.clone(),
                    origin: flight.origin.clone(),
                    destination: flight.destination.clone(),
                    load_factor: flight.load_factor,
                }],
                passengers: passengers.clone(),
                agent_type: request.agent_type,
                corporate_client: request.corporate_client.clone(),
                user_id: None,
                promo_code: None,
            });

            let quote = match quote {
                Ok(quote) => quote,
                Err(PricingError::FareNotFound(what)) => {
                    debug!(flight = %flight.key, class = %bucket.booking_class, "no fare filed: {}", what);
                    continue;
                }
                Err(err) => return Err(CoreError::from(err)),
            };

            let seats_available = [
                Some(flight.sellable()),
                flight.cabin_sellable(bucket.cabin),
                Some(bucket.sellable()),
            ]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or_default();

            options.push(FlightOption {
                itinerary_id: ItineraryRef::single(segment.clone()).to_string(),
                flight: segment.flight,
                origin: flight.origin.clone(),
                destination: flight.destination.clone(),
                cabin: segment.cabin,
                booking_class: segment.booking_class,
                seats_available,
                currency: quote.currency.clone(),
                total_fare: quote.total,
                passenger_fares: quote
                    .lines
                    .iter()
                    .map(|line| PassengerFare {
                        passenger_type: line.breakdown.passenger_type,
                        amount: line.breakdown.total,
                    })
                    .collect(),
            });
        }
        Ok(options)
    }
}
