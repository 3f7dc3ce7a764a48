use foundation::{great_circle_distance_m, stable_total_cmp_f64, LatLon};

use crate::job::NearbyMapCandidate;

/// Orders candidates by great-circle distance from `device`, nearest first.
///
/// The sort is stable, so equidistant maps keep their listing order. Without
/// a device position the listing order is returned unchanged.
pub fn rank_by_distance(
    mut candidates: Vec<NearbyMapCandidate>,
    device: Option<LatLon>,
) -> Vec<NearbyMapCandidate> {
    let Some(device) = device else {
        return candidates;
    };
    candidates.sort_by(|a, b| {
        stable_total_cmp_f64(
            great_circle_distance_m(device, a.position),
            great_circle_distance_m(device, b.position),
        )
    });
    candidates
}

/// Distance in meters from `device` to every candidate, in candidate order.
pub fn distances_m(candidates: &[NearbyMapCandidate], device: LatLon) -> Vec<f64> {
    candidates
        .iter()
        .map(|c| great_circle_distance_m(device, c.position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{MapStatus, Privacy};
    use foundation::MapId;
    use pretty_assertions::assert_eq;

    fn candidate(id: i32, lat: f64, lon: f64) -> NearbyMapCandidate {
        NearbyMapCandidate {
            id: MapId::new(id),
            name: String::new(),
            privacy: Privacy::Private,
            position: LatLon::new(lat, lon),
            status: MapStatus::Done,
        }
    }

    fn ids(list: &[NearbyMapCandidate]) -> Vec<i32> {
        list.iter().map(|c| c.id.0).collect()
    }

    #[test]
    fn nearer_map_ranks_first() {
        let ranked = rank_by_distance(
            vec![candidate(1, 0.0, 10.0), candidate(2, 0.0, 1.0)],
            Some(LatLon::new(0.0, 0.0)),
        );
        assert_eq!(ids(&ranked), vec![2, 1]);
    }

    #[test]
    fn ties_keep_listing_order() {
        let ranked = rank_by_distance(
            vec![
                candidate(3, 0.0, 1.0),
                candidate(1, 0.0, -1.0),
                candidate(2, 0.0, 1.0),
            ],
            Some(LatLon::new(0.0, 0.0)),
        );
        assert_eq!(ids(&ranked), vec![3, 1, 2]);
    }

    #[test]
    fn no_position_keeps_listing_order() {
        let ranked = rank_by_distance(vec![candidate(7, 5.0, 5.0), candidate(4, 0.0, 0.0)], None);
        assert_eq!(ids(&ranked), vec![7, 4]);
    }

    #[test]
    fn distances_follow_candidate_order() {
        let list = vec![candidate(1, 0.0, 0.0), candidate(2, 1.0, 0.0)];
        let d = distances_m(&list, LatLon::new(0.0, 0.0));
        assert_eq!(d[0], 0.0);
        assert!((d[1] - 111_195.0).abs() < 1.0);
    }
}
