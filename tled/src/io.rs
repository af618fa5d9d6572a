use std::fs::File;
use std::path::Path;

use thiserror::Error;

use crate::material::NeoHookean;
use crate::relaxation::DynRelaxProp;
use crate::solver::SimParams;

#[derive(Error, Debug)]
pub enum LoadConfigError {
    #[error("IO")]
    IO(#[from] std::io::Error),
    #[error("Parse")]
    Parse(#[from] ron::error::SpannedError),
}

pub fn load_sim_params(path: impl AsRef<Path>) -> std::result::Result<SimParams, LoadConfigError> {
    let f = File::open(path.as_ref())?;
    Ok(ron::de::from_reader(f)?)
}

pub fn load_relax_props(
    path: impl AsRef<Path>,
) -> std::result::Result<DynRelaxProp, LoadConfigError> {
    let f = File::open(path.as_ref())?;
    Ok(ron::de::from_reader(f)?)
}

pub fn load_material(path: impl AsRef<Path>) -> std::result::Result<NeoHookean, LoadConfigError> {
    let f = File::open(path.as_ref())?;
    Ok(ron::de::from_reader(f)?)
}
