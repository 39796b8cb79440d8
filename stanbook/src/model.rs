//! Stan model descriptors.
//!
//! A descriptor is an immutable Stan program plus two pieces of metadata its
//! author writes down next to it: which size variables govern which data
//! sequences, and which parameters the program declares. The program text is
//! never parsed here; CmdStan is the only thing that reads it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A data size variable and the sequences whose length it fixes.
///
/// A binding with no sequences (e.g. `G`, `Np`) is still required to be
/// present in the payload as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBinding {
    pub size_var: &'static str,
    pub sequences: &'static [&'static str],
}

/// An immutable Stan program with its declared data sizes and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    name: &'static str,
    code: &'static str,
    sizes: &'static [SizeBinding],
    parameters: &'static [&'static str],
}

impl ModelDescriptor {
    pub const fn new(
        name: &'static str,
        code: &'static str,
        sizes: &'static [SizeBinding],
        parameters: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            code,
            sizes,
            parameters,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn size_bindings(&self) -> &'static [SizeBinding] {
        self.sizes
    }

    /// Declared unknowns and generated quantities, by base name (`mu`, not `mu.1`).
    pub fn parameters(&self) -> &'static [&'static str] {
        self.parameters
    }

    /// Write `<dir>/<name>.stan`, leaving an identical file untouched so the
    /// compiled executable next to it stays newer than its source.
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.stan", self.name));
        match fs::read_to_string(&path) {
            Ok(existing) if existing == self.code => {}
            _ => fs::write(&path, self.code)?,
        }
        Ok(path)
    }
}

const N_Y: &[SizeBinding] = &[SizeBinding {
    size_var: "N",
    sequences: &["y"],
}];

pub const NORMAL_UNIFORM: ModelDescriptor = ModelDescriptor::new(
    "normal_uniform",
    include_str!("../models/normal_uniform.stan"),
    N_Y,
    &["mu", "s"],
);

pub const NORMAL_OUTLIER: ModelDescriptor = ModelDescriptor::new(
    "normal_outlier",
    include_str!("../models/normal_outlier.stan"),
    N_Y,
    &["mu", "s"],
);

pub const STUDENT_T: ModelDescriptor = ModelDescriptor::new(
    "student_t",
    include_str!("../models/student_t.stan"),
    N_Y,
    &["mu", "s", "nu"],
);

pub const PAIRED_DIFFERENCE: ModelDescriptor = ModelDescriptor::new(
    "paired_difference",
    include_str!("../models/paired_difference.stan"),
    &[SizeBinding {
        size_var: "N",
        sequences: &["before", "after"],
    }],
    &["mu_diff", "s_diff", "effect_size"],
);

pub const TWO_GROUP: ModelDescriptor = ModelDescriptor::new(
    "two_group",
    include_str!("../models/two_group.stan"),
    &[
        SizeBinding {
            size_var: "N",
            sequences: &["y", "group"],
        },
        SizeBinding {
            size_var: "G",
            sequences: &[],
        },
    ],
    &["mu", "s", "mu_diff"],
);

pub const LINEAR_REGRESSION: ModelDescriptor = ModelDescriptor::new(
    "linear_regression",
    include_str!("../models/linear_regression.stan"),
    &[SizeBinding {
        size_var: "N",
        sequences: &["x", "y"],
    }],
    &["alpha", "beta", "s"],
);

pub const HIERARCHICAL_REGRESSION: ModelDescriptor = ModelDescriptor::new(
    "hierarchical_regression",
    include_str!("../models/hierarchical_regression.stan"),
    &[
        SizeBinding {
            size_var: "N",
            sequences: &["x", "y", "group"],
        },
        SizeBinding {
            size_var: "G",
            sequences: &[],
        },
    ],
    &[
        "mu_alpha",
        "sigma_alpha",
        "mu_beta",
        "sigma_beta",
        "alpha",
        "beta",
        "s",
    ],
);

pub const THREE_LEVEL: ModelDescriptor = ModelDescriptor::new(
    "three_level",
    include_str!("../models/three_level.stan"),
    &[
        SizeBinding {
            size_var: "Nb",
            sequences: &["y", "city_id", "province_id"],
        },
        SizeBinding {
            size_var: "Nc",
            sequences: &["city_province_lkp"],
        },
        SizeBinding {
            size_var: "Np",
            sequences: &[],
        },
    ],
    &["mu", "sigma_p", "mu_p", "sigma_c", "mu_c", "s", "province_effect"],
);

/// Every built-in descriptor, simplest first.
pub fn library() -> &'static [ModelDescriptor] {
    const ALL: &[ModelDescriptor] = &[
        NORMAL_UNIFORM,
        NORMAL_OUTLIER,
        STUDENT_T,
        PAIRED_DIFFERENCE,
        TWO_GROUP,
        LINEAR_REGRESSION,
        HIERARCHICAL_REGRESSION,
        THREE_LEVEL,
    ];
    ALL
}

pub fn find(name: &str) -> Option<&'static ModelDescriptor> {
    library().iter().find(|m| m.name == name)
}
