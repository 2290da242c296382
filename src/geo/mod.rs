use uuid::Uuid;

use crate::models::account::{GeoPoint, Outlet};

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Outlet selection for a pickup request: plain nearest-by-distance.
pub fn nearest_outlet(outlets: impl Iterator<Item = Outlet>, from: &GeoPoint) -> Option<Uuid> {
    outlets
        .min_by(|a, b| {
            haversine_km(&a.location, from).total_cmp(&haversine_km(&b.location, from))
        })
        .map(|outlet| outlet.id)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{haversine_km, nearest_outlet};
    use crate::models::account::{GeoPoint, Outlet};

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn nearest_outlet_prefers_the_closer_one() {
        let near = Outlet {
            id: Uuid::from_u128(1),
            name: "central".to_string(),
            location: GeoPoint {
                lat: 53.5512,
                lng: 9.9938,
            },
        };
        let far = Outlet {
            id: Uuid::from_u128(2),
            name: "suburb".to_string(),
            location: GeoPoint {
                lat: 53.7,
                lng: 10.2,
            },
        };

        let from = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let picked = nearest_outlet(vec![far, near].into_iter(), &from);
        assert_eq!(picked, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn no_outlets_yields_none() {
        let from = GeoPoint { lat: 0.0, lng: 0.0 };
        assert_eq!(nearest_outlet(std::iter::empty(), &from), None);
    }
}
