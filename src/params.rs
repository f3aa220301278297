use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::Bm3dError;

/// Parameter profiles trading denoising quality against speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Fast,
    Lc,
    Np,
    High,
    Vn,
}

impl FromStr for Profile {
    type Err = Bm3dError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Profile::Fast),
            "lc" => Ok(Profile::Lc),
            "np" => Ok(Profile::Np),
            "high" => Ok(Profile::High),
            "vn" => Ok(Profile::Vn),
            _ => Err(Bm3dError::UnknownProfile),
        }
    }
}

/// Spatial BM3D parameters. `wiener` selects the Final-stage defaults and
/// shrinkage; the hard-threshold multiplier `lambda` is only meaningful when
/// `wiener` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm3dParams {
    pub wiener: bool,
    pub profile: Profile,
    pub sigma: [f64; 3],
    pub block_size: usize,
    pub block_step: usize,
    pub group_size: usize,
    pub bm_range: usize,
    pub bm_step: usize,
    pub th_mse: f64,
    pub lambda: f64,
}

impl Bm3dParams {
    pub fn new(wiener: bool, profile: Profile) -> Self {
        let mut para = Bm3dParams {
            wiener,
            profile,
            sigma: [10.0, 10.0, 10.0],
            block_size: 8,
            block_step: if wiener { 3 } else { 4 },
            group_size: if wiener { 32 } else { 16 },
            bm_range: 16,
            bm_step: 1,
            th_mse: 0.0,
            lambda: 2.7,
        };

        match profile {
            Profile::Fast => {
                para.bm_range = 9;
                para.group_size = 8;
                para.block_step = if wiener { 7 } else { 8 };
            }
            Profile::Lc => {
                para.bm_range = 9;
                if wiener {
                    para.block_step = 5;
                    para.group_size = 16;
                } else {
                    para.block_step = 6;
                }
            }
            Profile::Np => {}
            Profile::High => {
                para.block_step = if wiener { 2 } else { 3 };
            }
            Profile::Vn => {
                if wiener {
                    para.block_size = 11;
                    para.block_step = 6;
                } else {
                    para.block_step = 4;
                    para.group_size = 32;
                    para.lambda = 2.8;
                }
            }
        }

        para.th_mse_default();
        para
    }

    /// Default matching threshold, linear in the luma sigma.
    pub fn th_mse_default(&mut self) {
        self.th_mse = if self.wiener {
            if self.profile == Profile::Vn {
                400.0 + self.sigma[0] * 40.0
            } else {
                200.0 + self.sigma[0] * 10.0
            }
        } else if self.profile == Profile::Vn {
            1000.0 + self.sigma[0] * 150.0
        } else {
            400.0 + self.sigma[0] * 80.0
        };
    }

    /// Replaces sigma, broadcasting the last supplied value over the
    /// remaining channels, and refreshes the default threshold.
    pub fn set_sigma(&mut self, sigma: &[f64]) -> Result<(), Bm3dError> {
        if sigma.is_empty() {
            return Ok(());
        }
        for (i, slot) in self.sigma.iter_mut().enumerate() {
            let value = sigma[i.min(sigma.len() - 1)];
            if value < 0.0 {
                return Err(Bm3dError::Param {
                    name: "sigma",
                    constraint: "a non-negative floating point number",
                });
            }
            *slot = value;
        }
        self.th_mse_default();
        Ok(())
    }

    pub fn validate(&self, width: usize, height: usize) -> Result<(), Bm3dError> {
        if self.block_size < 1 || self.block_size > 64 {
            return Err(Bm3dError::Param {
                name: "block_size",
                constraint: "an integer in [1, 64]",
            });
        }
        if self.block_size > width || self.block_size > height {
            return Err(Bm3dError::Param {
                name: "block_size",
                constraint: "not exceeding width or height of the frame",
            });
        }
        if self.block_step < 1 || self.block_step > self.block_size {
            return Err(Bm3dError::Param {
                name: "block_step",
                constraint: "an integer in [1, block_size]",
            });
        }
        if self.group_size < 1 || self.group_size > 256 {
            return Err(Bm3dError::Param {
                name: "group_size",
                constraint: "an integer in [1, 256]",
            });
        }
        if self.bm_range < 1 {
            return Err(Bm3dError::Param {
                name: "bm_range",
                constraint: "a positive integer",
            });
        }
        if self.bm_step < 1 || self.bm_step > self.bm_range {
            return Err(Bm3dError::Param {
                name: "bm_step",
                constraint: "an integer in [1, bm_range]",
            });
        }
        for value in self.sigma {
            if value < 0.0 {
                return Err(Bm3dError::Param {
                    name: "sigma",
                    constraint: "a non-negative floating point number",
                });
            }
        }
        if !self.wiener && self.lambda <= 0.0 {
            return Err(Bm3dError::Param {
                name: "hard_thr",
                constraint: "a positive floating point number",
            });
        }
        Ok(())
    }
}

/// V-BM3D parameters: the spatial set plus the temporal window radius and
/// the predictive-search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VBm3dParams {
    #[serde(flatten)]
    pub bm3d: Bm3dParams,
    pub radius: usize,
    pub ps_num: usize,
    pub ps_range: usize,
    pub ps_step: usize,
}

impl VBm3dParams {
    pub fn new(wiener: bool, profile: Profile) -> Self {
        let mut bm3d = Bm3dParams::new(wiener, profile);
        bm3d.group_size = 8;
        bm3d.bm_range = 12;

        let mut para = VBm3dParams {
            bm3d,
            radius: 3,
            ps_num: 2,
            ps_range: if wiener { 6 } else { 5 },
            ps_step: 1,
        };

        match profile {
            Profile::Fast => {
                para.radius = 1;
                para.bm3d.bm_range = 7;
                para.ps_range = if wiener { 5 } else { 4 };
            }
            Profile::Lc => {
                para.radius = 2;
                para.bm3d.bm_range = 9;
                para.ps_range = if wiener { 5 } else { 4 };
            }
            Profile::Np => {}
            Profile::High => {
                para.radius = 4;
                para.bm3d.bm_range = 16;
                para.ps_range = if wiener { 8 } else { 7 };
            }
            Profile::Vn => {
                para.radius = 4;
                para.bm3d.group_size = 16;
            }
        }

        para
    }

    pub fn validate(&self, width: usize, height: usize) -> Result<(), Bm3dError> {
        self.bm3d.validate(width, height)?;
        if self.radius < 1 || self.radius > 16 {
            return Err(Bm3dError::Param {
                name: "radius",
                constraint: "an integer in [1, 16]",
            });
        }
        if self.ps_num < 1 || self.ps_num > self.bm3d.group_size {
            return Err(Bm3dError::Param {
                name: "ps_num",
                constraint: "an integer in [1, group_size]",
            });
        }
        if self.ps_range < 1 {
            return Err(Bm3dError::Param {
                name: "ps_range",
                constraint: "a positive integer",
            });
        }
        if self.ps_step < 1 || self.ps_step > self.ps_range {
            return Err(Bm3dError::Param {
                name: "ps_step",
                constraint: "an integer in [1, ps_range]",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_profile_defaults() {
        let p = Bm3dParams::new(false, Profile::Fast);
        assert_eq!((p.block_step, p.group_size, p.bm_range), (8, 8, 9));
        assert_eq!(p.th_mse, 400.0 + 10.0 * 80.0);

        let p = Bm3dParams::new(false, Profile::Lc);
        assert_eq!((p.block_step, p.group_size, p.bm_range), (6, 16, 9));

        let p = Bm3dParams::new(false, Profile::Np);
        assert_eq!((p.block_step, p.group_size, p.bm_range), (4, 16, 16));

        let p = Bm3dParams::new(false, Profile::High);
        assert_eq!((p.block_step, p.group_size, p.bm_range), (3, 16, 16));

        let p = Bm3dParams::new(false, Profile::Vn);
        assert_eq!((p.block_step, p.group_size, p.bm_range), (4, 32, 16));
        assert_eq!(p.lambda, 2.8);
        assert_eq!(p.th_mse, 1000.0 + 10.0 * 150.0);
    }

    #[test]
    fn test_final_profile_defaults() {
        let p = Bm3dParams::new(true, Profile::Fast);
        assert_eq!((p.block_step, p.group_size), (7, 8));
        assert_eq!(p.th_mse, 200.0 + 10.0 * 10.0);

        let p = Bm3dParams::new(true, Profile::Lc);
        assert_eq!((p.block_step, p.group_size), (5, 16));

        let p = Bm3dParams::new(true, Profile::Np);
        assert_eq!((p.block_step, p.group_size), (3, 32));

        let p = Bm3dParams::new(true, Profile::High);
        assert_eq!((p.block_step, p.group_size), (2, 32));

        let p = Bm3dParams::new(true, Profile::Vn);
        assert_eq!(p.block_size, 11);
        assert_eq!((p.block_step, p.group_size), (6, 32));
        assert_eq!(p.th_mse, 400.0 + 10.0 * 40.0);
    }

    #[test]
    fn test_temporal_profile_defaults() {
        let p = VBm3dParams::new(false, Profile::Fast);
        assert_eq!((p.radius, p.bm3d.bm_range, p.ps_range), (1, 7, 4));

        let p = VBm3dParams::new(true, Profile::High);
        assert_eq!((p.radius, p.bm3d.bm_range, p.ps_range), (4, 16, 8));

        let p = VBm3dParams::new(false, Profile::Vn);
        assert_eq!((p.radius, p.bm3d.group_size), (4, 16));
    }

    #[test]
    fn test_sigma_broadcast() {
        let mut p = Bm3dParams::new(false, Profile::Np);
        p.set_sigma(&[5.0]).unwrap();
        assert_eq!(p.sigma, [5.0, 5.0, 5.0]);
        p.set_sigma(&[3.0, 1.0]).unwrap();
        assert_eq!(p.sigma, [3.0, 1.0, 1.0]);
        assert!(p.set_sigma(&[-1.0]).is_err());
    }

    #[test]
    fn test_validation_ranges() {
        let mut p = Bm3dParams::new(false, Profile::Np);
        assert!(p.validate(64, 64).is_ok());
        assert!(p.validate(4, 64).is_err());
        p.block_step = 9;
        assert!(p.validate(64, 64).is_err());
        p = Bm3dParams::new(false, Profile::Np);
        p.group_size = 0;
        assert!(p.validate(64, 64).is_err());
        p = Bm3dParams::new(false, Profile::Np);
        p.bm_step = 20;
        assert!(p.validate(64, 64).is_err());
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!(Profile::from_str("np").unwrap(), Profile::Np);
        assert!(Profile::from_str("ultra").is_err());
    }

    #[test]
    fn test_params_serde_round_trip() {
        let p = VBm3dParams::new(true, Profile::Lc);
        let json = serde_json::to_string(&p).unwrap();
        let back: VBm3dParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.radius, p.radius);
        assert_eq!(back.bm3d.block_step, p.bm3d.block_step);
    }
}
