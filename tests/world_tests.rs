//! World model tests

#[cfg(test)]
mod tests {
    use sophon::types::{ChunkSize, Coordinate, DiscoveredItem, ExploredRegion, Footprint, LocationId};
    use sophon::world::{EntityUpdate, Planet, Voyage, WorldModel, WorldView};

    fn region_with(ids: &[u8]) -> ExploredRegion {
        ExploredRegion {
            footprint: Footprint::new(Coordinate::origin(), ChunkSize::S16),
            items: ids
                .iter()
                .map(|&n| DiscoveredItem {
                    coords: Coordinate::new(n as i64, 0),
                    id: LocationId([n; 16]),
                    terrain: 3.0,
                })
                .collect(),
            mean_terrain: 3.0,
            discovered_at: 0,
        }
    }

    #[test]
    fn discovered_planets_are_added_once() {
        let world = WorldModel::new();
        assert_eq!(world.add_discovered(&region_with(&[1, 2, 3])), 3);
        assert_eq!(world.add_discovered(&region_with(&[3, 4])), 1);
        assert_eq!(world.planet_count(), 4);
        let p = world.planet(&LocationId([4; 16])).unwrap();
        assert!(p.owner.is_none());
    }

    #[test]
    fn discovery_does_not_clobber_known_planet() {
        let world = WorldModel::new();
        let id = LocationId([9; 16]);
        world.apply_updates([EntityUpdate::Planet(Planet {
            silver: 42.0,
            ..Planet::unclaimed(id)
        })]);
        world.add_discovered(&region_with(&[9]));
        assert_eq!(world.planet(&id).unwrap().silver, 42.0);
    }

    #[test]
    fn voyages_follow_authoritative_updates() {
        let world = WorldModel::new();
        let voyage = Voyage {
            id: "v1".into(),
            from: LocationId([1; 16]),
            to: LocationId([2; 16]),
            energy: 5.0,
            silver: 0.0,
            provisional: true,
        };
        world.apply_updates([EntityUpdate::Voyage(voyage)]);
        let voyages = world.voyages();
        assert_eq!(voyages.len(), 1);
        assert!(!voyages[0].provisional, "authoritative voyages are never provisional");

        world.apply_updates([EntityUpdate::VoyageArrived { id: "v1".into() }]);
        assert!(world.voyages().is_empty());
    }

    #[test]
    fn entity_updates_are_tagged_json() {
        let json = serde_json::to_value(EntityUpdate::VoyageArrived { id: "v9".into() }).unwrap();
        assert_eq!(json["entity"], "voyage-arrived");
        assert_eq!(json["id"], "v9");
    }
}
