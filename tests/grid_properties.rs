use skygrid::{Point3D, SpatialGrid};

/// Small deterministic generator so the property runs are reproducible
struct Lcg(u64);

impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 40) as f32 / (1u64 << 24) as f32
    }

    fn range(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }
}

#[test]
fn cells_partition_the_extent() {
    let grid = SpatialGrid::new(0.3, 4.7, -2.1, 1.9, 5, 7).unwrap();
    let mut rng = Lcg(42);

    for _ in 0..20_000 {
        let x = rng.range(-3.0, 3.0);
        let z = rng.range(-0.5, 5.5);
        let inside = (-2.1..=1.9).contains(&x) && (0.3..=4.7).contains(&z);
        match grid.locate(x, z) {
            Some((row, col)) => {
                assert!(inside, "({}, {}) matched outside the extent", x, z);
                let cell = grid.cell_at(row, col).unwrap();
                assert!(cell.contains(x, z), "({}, {}) not in {:?}", x, z, cell);
            }
            None => assert!(!inside, "({}, {}) unmatched inside the extent", x, z),
        }
    }
}

#[test]
fn shared_edges_are_counted_once() {
    let mut grid = SpatialGrid::new(0.0, 3.0, 0.0, 3.0, 3, 3).unwrap();
    for i in 0..=3 {
        for j in 0..=3 {
            grid.ingest(&Point3D::new(i as f32, 1.0, j as f32));
        }
    }
    let total: u32 = grid.cells().iter().map(|c| c.count).sum();
    assert_eq!(total, 16);
    // Interior lattice points go to the higher-indexed neighbour
    assert_eq!(grid.cell_at(1, 1).unwrap().count, 1);
    // The outer corner belongs to the last cell
    assert_eq!(grid.cell_at(2, 2).unwrap().count, 4);
}

#[test]
fn reset_restores_sentinels_everywhere() {
    let mut grid = SpatialGrid::new(0.0, 2.0, -1.0, 1.0, 4, 4).unwrap();
    let mut rng = Lcg(7);
    for _ in 0..1000 {
        grid.ingest(&Point3D::new(
            rng.range(-1.0, 1.0),
            rng.range(-1.0, 2.0),
            rng.range(0.0, 2.0),
        ));
    }
    assert!(grid.cells().iter().any(|c| c.count > 0));

    grid.reset();
    for row in 0..4 {
        for col in 0..4 {
            let cell = grid.cell_at(row, col).unwrap();
            assert_eq!(cell.count, 0);
            assert_eq!(cell.min_height, f32::INFINITY);
            assert_eq!(cell.max_height, f32::NEG_INFINITY);
        }
    }
}

#[test]
fn opposite_shifts_restore_bounds() {
    let mut grid = SpatialGrid::new(0.5, 4.0, -1.5, 1.5, 3, 3).unwrap();
    let original: Vec<_> = grid.cells().to_vec();
    let mut rng = Lcg(99);

    for _ in 0..10 {
        let dx = rng.range(-5.0, 5.0);
        let dz = rng.range(-5.0, 5.0);
        grid.shift_x(dx).unwrap();
        grid.shift_z(dz).unwrap();
        grid.shift_x(-dx).unwrap();
        grid.shift_z(-dz).unwrap();
    }

    for (now, before) in grid.cells().iter().zip(&original) {
        assert!((now.x_min - before.x_min).abs() < 1e-4);
        assert!((now.x_max - before.x_max).abs() < 1e-4);
        assert!((now.z_min - before.z_min).abs() < 1e-4);
        assert!((now.z_max - before.z_max).abs() < 1e-4);
    }
}
