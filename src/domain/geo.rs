use crate::domain::brand::Branch;
use crate::error::{CommerceError, Result};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A validated latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if valid {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(CommerceError::InvalidCoordinate {
                latitude,
                longitude,
            })
        }
    }
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchDistance {
    pub branch: String,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadiusCheck {
    pub within: bool,
    pub branch: String,
    pub distance_km: f64,
}

/// Resolves the branch closest to a customer and whether it delivers there.
///
/// Branches are visited in name order, so equal distances always resolve to
/// the alphabetically first branch.
#[derive(Debug, Clone)]
pub struct GeoResolver<'a> {
    branches: Vec<&'a Branch>,
    radius_km: f64,
}

impl<'a> GeoResolver<'a> {
    pub fn new(branches: &'a [Branch], radius_km: f64) -> Result<Self> {
        if branches.is_empty() {
            return Err(CommerceError::Config(
                "at least one branch is required for delivery resolution".to_string(),
            ));
        }
        let mut branches: Vec<&Branch> = branches.iter().collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self {
            branches,
            radius_km,
        })
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    pub fn nearest_branch(&self, latitude: f64, longitude: f64) -> Result<BranchDistance> {
        let point = Coordinates::new(latitude, longitude)?;

        let mut nearest: Option<BranchDistance> = None;
        for branch in &self.branches {
            let distance_km = haversine_km(point, branch.coordinates());
            if nearest
                .as_ref()
                .is_none_or(|current| distance_km < current.distance_km)
            {
                nearest = Some(BranchDistance {
                    branch: branch.name.clone(),
                    distance_km,
                });
            }
        }

        nearest.ok_or_else(|| CommerceError::Config("no branches configured".to_string()))
    }

    pub fn is_within_radius(&self, latitude: f64, longitude: f64) -> Result<RadiusCheck> {
        let BranchDistance {
            branch,
            distance_km,
        } = self.nearest_branch(latitude, longitude)?;
        Ok(RadiusCheck {
            within: distance_km <= self.radius_km,
            branch,
            distance_km,
        })
    }
}
