use crate::store::DocPath;

pub const ORDERS: &str = "Orders";
pub const TICKETS: &str = "Tickets";
pub const EVENTS_METADATA: &str = "EventsMetadata";
pub const USERS: &str = "Users";
pub const TICKET_TYPES: &str = "TicketTypes";

pub fn event(event_id: &str, is_private: bool) -> DocPath {
    let collection = if is_private {
        "Events/Active/Private"
    } else {
        "Events/Active/Public"
    };
    DocPath::new(collection, event_id)
}

pub fn ticket_type(event_id: &str, is_private: bool, ticket_type_id: &str) -> DocPath {
    event(event_id, is_private).child(TICKET_TYPES, ticket_type_id)
}

pub fn event_metadata(event_id: &str) -> DocPath {
    DocPath::new(EVENTS_METADATA, event_id)
}

pub fn organiser(organiser_id: &str) -> DocPath {
    DocPath::new(USERS, organiser_id)
}

pub fn order(order_id: &str) -> DocPath {
    DocPath::new(ORDERS, order_id)
}

pub fn ticket(ticket_id: &str) -> DocPath {
    DocPath::new(TICKETS, ticket_id)
}

/// Per-buyer index of completed checkout sessions for one event.
pub fn purchaser_sessions(purchaser_key: &str, event_id: &str) -> DocPath {
    DocPath::new(format!("Attendees/emails/{}", purchaser_key), event_id)
}
