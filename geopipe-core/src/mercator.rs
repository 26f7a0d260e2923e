use geo::Coord;
use std::f64::consts::PI;

/// The projected world square all cell grids are defined over. Longitude maps
/// to x directly; latitude is mercator-projected and clamped so the square is
/// exactly [-180, 180] on both axes.
pub const MIN_X: f64 = -180.0;
pub const MAX_X: f64 = 180.0;
pub const MIN_Y: f64 = -180.0;
pub const MAX_Y: f64 = 180.0;

pub fn from_lat_lon(lat: f64, lon: f64) -> Coord<f64> {
    let y = (180.0 / PI) * ((PI / 4.0 + lat.to_radians() / 2.0).tan()).ln();
    Coord {
        x: lon.clamp(MIN_X, MAX_X),
        y: y.clamp(MIN_Y, MAX_Y),
    }
}

pub fn to_lat_lon(point: Coord<f64>) -> (f64, f64) {
    let lat = (2.0 * ((point.y * PI / 180.0).exp()).atan() - PI / 2.0).to_degrees();
    (lat, point.x)
}

/// Maps a projected point into the grid space of a depth-`depth` cell tree,
/// where the world square spans `2^depth` units per axis (a leaf cell is 2
/// units wide).
pub fn to_cell_grid(point: Coord<f64>, depth: usize) -> Coord<f64> {
    let side = (1u64 << depth) as f64;
    Coord {
        x: (point.x - MIN_X) / (MAX_X - MIN_X) * side,
        y: (point.y - MIN_Y) / (MAX_Y - MIN_Y) * side,
    }
}
