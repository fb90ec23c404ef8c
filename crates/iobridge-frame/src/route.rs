//! Packet routes.
//!
//! Routes 0-253 address standard-space libraries by registration index.
//! The top two values are reserved.

/// Highest library index a packet can address.
pub const MAX_LIBRARY: u8 = 0xFD;

/// Server control commands (library listing, scheduler, echo).
pub const SERVER: u8 = 0xFE;

/// Custom-space commands with 16-bit IDs.
pub const CUSTOM: u8 = 0xFF;

/// Returns a human-readable name for a route.
pub fn route_name(route: u8) -> &'static str {
    match route {
        SERVER => "SERVER",
        CUSTOM => "CUSTOM",
        _ => "LIBRARY",
    }
}

/// Returns true if the route addresses a standard-space library.
pub fn is_library(route: u8) -> bool {
    route <= MAX_LIBRARY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_ranges() {
        assert_eq!(route_name(0), "LIBRARY");
        assert_eq!(route_name(SERVER), "SERVER");
        assert_eq!(route_name(CUSTOM), "CUSTOM");
        assert!(is_library(MAX_LIBRARY));
        assert!(!is_library(SERVER));
    }
}
