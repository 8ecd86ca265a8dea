//! Points, polygons and geodesic distance on the WGS-84 ellipsoid.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::ModelError;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);
const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;
const VINCENTY_MAX_ITERATIONS: usize = 200;

/// Coordinates closer than this (in degrees) are the same vertex.
pub const COORD_EPSILON: f64 = 1e-9;

/// A latitude/longitude pair in degrees.
///
/// Equality and hashing are by exact value so points can key maps and sets;
/// use [`GeoPoint::approx_eq`] for tolerant comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Geodesic distance in meters.
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        vincenty_m(self, other).unwrap_or_else(|| haversine_m(self, other))
    }

    pub fn approx_eq(&self, other: &GeoPoint) -> bool {
        (self.latitude - other.latitude).abs() <= COORD_EPSILON
            && (self.longitude - other.longitude).abs() <= COORD_EPSILON
    }

    pub fn rounded(&self, decimals: i32) -> GeoPoint {
        GeoPoint::new(
            round_to(self.latitude, decimals),
            round_to(self.longitude, decimals),
        )
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl PartialEq for GeoPoint {
    fn eq(&self, other: &Self) -> bool {
        self.latitude.to_bits() == other.latitude.to_bits()
            && self.longitude.to_bits() == other.longitude.to_bits()
    }
}

impl Eq for GeoPoint {}

impl Hash for GeoPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.latitude.to_bits().hash(state);
        self.longitude.to_bits().hash(state);
    }
}

impl Ord for GeoPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.latitude
            .total_cmp(&other.latitude)
            .then_with(|| self.longitude.total_cmp(&other.longitude))
    }
}

impl PartialOrd for GeoPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Vincenty's inverse formula. `None` when the iteration fails to converge,
/// which happens for nearly antipodal points.
fn vincenty_m(p1: &GeoPoint, p2: &GeoPoint) -> Option<f64> {
    if p1 == p2 {
        return Some(0.0);
    }
    let l = (p2.longitude - p1.longitude).to_radians();
    let u1 = ((1.0 - WGS84_F) * p1.latitude.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * p2.latitude.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial lines have cos_sq_alpha == 0.
        let cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - lambda_prev).abs() < 1e-12 {
            let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
            let a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = b
                * sin_sigma
                * (cos_2sigma_m
                    + b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(WGS84_B * a * (sigma - delta_sigma));
        }
    }
    None
}

fn haversine_m(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (p2.longitude - p1.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Exterior ring first, then holes. Rings may or may not repeat the first vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub rings: Vec<Vec<GeoPoint>>,
}

impl Polygon {
    pub fn new(rings: Vec<Vec<GeoPoint>>) -> Self {
        Self { rings }
    }

    pub fn exterior(&self) -> Option<&[GeoPoint]> {
        self.rings.first().map(Vec::as_slice)
    }

    /// Same shape regardless of starting vertex, orientation or explicit closure.
    pub fn same_shape(&self, other: &Polygon) -> bool {
        self.rings.len() == other.rings.len()
            && self
                .rings
                .iter()
                .zip(&other.rings)
                .all(|(a, b)| ring_eq(a, b))
    }

    pub fn rounded(&self, decimals: i32) -> Polygon {
        Polygon {
            rings: self
                .rings
                .iter()
                .map(|ring| ring.iter().map(|p| p.rounded(decimals)).collect())
                .collect(),
        }
    }
}

fn open_ring(ring: &[GeoPoint]) -> &[GeoPoint] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first.approx_eq(last) => {
            &ring[..ring.len() - 1]
        }
        _ => ring,
    }
}

fn ring_eq(a: &[GeoPoint], b: &[GeoPoint]) -> bool {
    let a = open_ring(a);
    let b = open_ring(b);
    if a.len() != b.len() {
        return false;
    }
    let n = a.len();
    if n == 0 {
        return true;
    }
    (0..n).filter(|&j| b[j].approx_eq(&a[0])).any(|j| {
        let forward = (0..n).all(|i| a[i].approx_eq(&b[(j + i) % n]));
        let backward = (0..n).all(|i| a[i].approx_eq(&b[(j + n - i) % n]));
        forward || backward
    })
}

/// A pool entrance or a place region, serialized as GeoJSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeoJson", into = "GeoJson")]
pub enum Geometry {
    Point(GeoPoint),
    Polygon(Polygon),
}

impl Geometry {
    pub fn same_shape(&self, other: &Geometry) -> bool {
        match (self, other) {
            (Geometry::Point(a), Geometry::Point(b)) => a.approx_eq(b),
            (Geometry::Polygon(a), Geometry::Polygon(b)) => a.same_shape(b),
            _ => false,
        }
    }

    pub fn rounded(&self, decimals: i32) -> Geometry {
        match self {
            Geometry::Point(p) => Geometry::Point(p.rounded(decimals)),
            Geometry::Polygon(p) => Geometry::Polygon(p.rounded(decimals)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::Polygon(_) => "Polygon",
        }
    }
}

/// Wire form: `{"type": "Point", "coordinates": [lon, lat]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    Point { coordinates: Vec<f64> },
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
}

fn position(coords: &[f64]) -> Result<GeoPoint, ModelError> {
    match coords {
        [lon, lat, ..] => Ok(GeoPoint::new(*lat, *lon)),
        _ => Err(ModelError::InvalidGeometry(format!(
            "position needs at least two coordinates, got {}",
            coords.len()
        ))),
    }
}

impl TryFrom<GeoJson> for Geometry {
    type Error = ModelError;

    fn try_from(value: GeoJson) -> Result<Self, Self::Error> {
        match value {
            GeoJson::Point { coordinates } => Ok(Geometry::Point(position(&coordinates)?)),
            GeoJson::Polygon { coordinates } => {
                let rings = coordinates
                    .iter()
                    .map(|ring| ring.iter().map(|c| position(c)).collect())
                    .collect::<Result<Vec<Vec<GeoPoint>>, _>>()?;
                if rings.first().map_or(true, |r| open_ring(r).len() < 3) {
                    return Err(ModelError::InvalidGeometry(
                        "polygon exterior ring needs at least three vertices".to_string(),
                    ));
                }
                Ok(Geometry::Polygon(Polygon { rings }))
            }
        }
    }
}

impl From<Geometry> for GeoJson {
    fn from(value: Geometry) -> Self {
        match value {
            Geometry::Point(p) => GeoJson::Point {
                coordinates: vec![p.longitude, p.latitude],
            },
            Geometry::Polygon(poly) => GeoJson::Polygon {
                coordinates: poly
                    .rings
                    .iter()
                    .map(|ring| ring.iter().map(|p| vec![p.longitude, p.latitude]).collect())
                    .collect(),
            },
        }
    }
}
