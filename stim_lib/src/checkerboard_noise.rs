use rand::Rng;
use serde_json::{json, Value};
use crate::params::{ParamValue, Params, ParamsExt};
use crate::protocol::{EpochContext, EpochSpec, ProtocolError, StimulusProtocol};
use crate::selector::SelectorState;

const MAX_SEED:u64 = 1_000_000;

/// Grid of independently updating squares drawn from a binary or gaussian distribution.
/// Each epoch gets a fresh start_seed so the frames can be regenerated offline.
#[derive(Clone,Debug,Default)]
pub struct CheckerboardNoise;

impl CheckerboardNoise {
    fn distribution(params:&Params) -> Result<Value,ProtocolError> {
        let rand_min = params.real("rand_min")?;
        let rand_max = params.real("rand_max")?;
        match params.text("distribution")? {
            "binary" => Ok(json!({
                "name":"Binary",
                "rand_min":rand_min,
                "rand_max":rand_max,
            })),
            "gaussian" => Ok(json!({
                "name":"Gaussian",
                "args":[params.real("mean")?,params.real("stdev")?],
                "rand_min":rand_min,
                "rand_max":rand_max,
            })),
            other => Err(ProtocolError::InvalidProtocolParameters(format!("distribution must be binary or gaussian, got {}",other)))
        }
    }
}

impl StimulusProtocol for CheckerboardNoise {

    fn protocol_id(&self) -> String {
        String::from("CheckerboardNoise")
    }

    fn protocol_parameter_defaults(&self) -> Params {
        let mut p = Params::new();
        p.insert("patch_size".into(),ParamValue::Real(5.0));
        p.insert("update_rate".into(),ParamValue::Real(20.0));
        p.insert("distribution".into(),ParamValue::from("binary"));
        p.insert("rand_min".into(),ParamValue::Real(0.0));
        p.insert("rand_max".into(),ParamValue::Real(1.0));
        p.insert("mean".into(),ParamValue::Real(0.5));
        p.insert("stdev".into(),ParamValue::Real(0.25));
        p.insert("sphere_radius".into(),ParamValue::Real(1.0));
        p
    }

    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError> {
        let p = ctx.params;
        let distribution_data = Self::distribution(p)?;
        let start_seed = selectors.rng().gen_range(1..MAX_SEED);
        let patch_size = p.real("patch_size")?;

        let stimulus = json!({
            "name":"RandomGrid",
            "patch_width":patch_size,
            "patch_height":patch_size,
            "cylinder_location":[0.0,0.0,0.0],
            "sphere_radius":p.real("sphere_radius")?,
            "update_rate":p.real("update_rate")?,
            "start_seed":start_seed,
            "distribution_data":distribution_data,
        });
        Ok(EpochSpec::single(stimulus)?.with("start_seed",start_seed))
    }
}
