use shared::{Event, InventorySource, TicketType, ADMIN_TICKET_TYPE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub price: i64,
    pub source: InventorySource,
    /// Value of the chosen pool's remaining count after taking the quantity.
    pub remaining_after: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    InvalidPrice,
    InsufficientInventory,
}

/// Chooses between a ticket-type pool and the event's legacy vacancy counter.
#[derive(Debug, Clone, Copy)]
pub struct InventoryResolver {
    min_chargeable_amount: i64,
}

impl InventoryResolver {
    pub fn new(min_chargeable_amount: i64) -> Self {
        Self {
            min_chargeable_amount,
        }
    }

    /// Pure decision over already-loaded documents. A usable ticket type wins
    /// over the legacy pool; the legacy pool is only consulted as a fallback.
    pub fn resolve(
        &self,
        event: &Event,
        ticket_type: Option<(&str, &TicketType)>,
        quantity: i64,
    ) -> Result<Resolution, Unavailable> {
        if let Some((ticket_type_id, ticket_type)) = ticket_type {
            if ticket_type_id != ADMIN_TICKET_TYPE
                && self.is_chargeable(ticket_type.price)
                && ticket_type.remaining() >= quantity
            {
                return Ok(Resolution {
                    price: ticket_type.price,
                    source: InventorySource::TicketTypePool {
                        ticket_type_id: ticket_type_id.to_string(),
                    },
                    remaining_after: ticket_type.remaining() - quantity,
                });
            }
        }

        let price = match event.price {
            Some(0) => 0,
            Some(price) if self.is_chargeable(price) => price,
            _ => return Err(Unavailable::InvalidPrice),
        };
        let vacancy = event.vacancy.unwrap_or(0);
        if vacancy < quantity {
            return Err(Unavailable::InsufficientInventory);
        }
        Ok(Resolution {
            price,
            source: InventorySource::LegacyEventPool,
            remaining_after: vacancy - quantity,
        })
    }

    fn is_chargeable(&self, price: i64) -> bool {
        price > 0 && price >= self.min_chargeable_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(vacancy: i64, price: Option<i64>) -> Event {
        let mut event: Event = serde_json::from_value(json!({"capacity": 10})).unwrap();
        event.vacancy = Some(vacancy);
        event.price = price;
        event
    }

    fn general(available: i64, sold: i64) -> TicketType {
        TicketType {
            name: "General".to_string(),
            price: 2500,
            available_quantity: available,
            sold_quantity: sold,
        }
    }

    #[test]
    fn ticket_type_pool_wins_when_both_can_satisfy() {
        let resolver = InventoryResolver::new(50);
        let general = general(3, 0);
        let resolution = resolver
            .resolve(&event(5, Some(2000)), Some(("General", &general)), 1)
            .unwrap();
        assert_eq!(resolution.price, 2500);
        assert_eq!(
            resolution.source,
            InventorySource::TicketTypePool {
                ticket_type_id: "General".to_string()
            }
        );
        assert_eq!(resolution.remaining_after, 2);
    }

    #[test]
    fn sold_out_ticket_type_falls_back_to_legacy_pool() {
        let resolver = InventoryResolver::new(50);
        let general = general(3, 3);
        let resolution = resolver
            .resolve(&event(5, Some(2000)), Some(("General", &general)), 2)
            .unwrap();
        assert_eq!(resolution.source, InventorySource::LegacyEventPool);
        assert_eq!(resolution.price, 2000);
        assert_eq!(resolution.remaining_after, 3);
    }

    #[test]
    fn admin_type_is_never_sold_through_checkout() {
        let resolver = InventoryResolver::new(50);
        let admin = TicketType {
            name: "Admin".to_string(),
            price: 2500,
            available_quantity: i64::from(i32::MAX),
            sold_quantity: 0,
        };
        let resolution = resolver
            .resolve(&event(1, Some(2000)), Some(("Admin", &admin)), 1)
            .unwrap();
        assert_eq!(resolution.source, InventorySource::LegacyEventPool);
    }

    #[test]
    fn free_events_are_allowed_but_tiny_prices_are_not() {
        let resolver = InventoryResolver::new(50);
        assert_eq!(resolver.resolve(&event(5, Some(0)), None, 1).unwrap().price, 0);
        assert_eq!(
            resolver.resolve(&event(5, Some(20)), None, 1),
            Err(Unavailable::InvalidPrice)
        );
        assert_eq!(
            resolver.resolve(&event(5, Some(-100)), None, 1),
            Err(Unavailable::InvalidPrice)
        );
        assert_eq!(resolver.resolve(&event(5, None), None, 1), Err(Unavailable::InvalidPrice));
    }

    #[test]
    fn declines_when_no_pool_has_enough() {
        let resolver = InventoryResolver::new(50);
        let general = general(3, 2);
        assert_eq!(
            resolver.resolve(&event(1, Some(2000)), Some(("General", &general)), 2),
            Err(Unavailable::InsufficientInventory)
        );
    }

    #[test]
    fn exact_fit_leaves_zero_remaining() {
        let resolver = InventoryResolver::new(50);
        let resolution = resolver.resolve(&event(2, Some(2000)), None, 2).unwrap();
        assert_eq!(resolution.remaining_after, 0);
    }
}
