use rand::seq::SliceRandom;
use serde_json::json;
use crate::params::{ParamValue, Params, ParamsExt};
use crate::protocol::{sampled_real, sampled_text, EpochContext, EpochSpec, ProtocolError, StimulusProtocol};
use crate::selector::{ParamSpec, SelectorState};
use crate::trajectory::{loom, loom_radius, Interpolation, TvPairs};

/// Spot whose angular size follows an object approaching at constant speed.
#[derive(Clone,Debug,Default)]
pub struct LoomingSpot;

impl StimulusProtocol for LoomingSpot {

    fn protocol_id(&self) -> String {
        String::from("LoomingSpot")
    }

    fn protocol_parameter_defaults(&self) -> Params {
        let mut p = Params::new();
        p.insert("rv_ratio".into(),ParamValue::from(vec![0.01,0.02,0.04,0.08]));
        p.insert("trajectory_type".into(),ParamValue::List(vec![ParamValue::from("expanding")]));
        p.insert("start_size".into(),ParamValue::Real(2.5));
        p.insert("end_size".into(),ParamValue::Real(80.0));
        p.insert("color".into(),ParamValue::Real(0.0));
        p.insert("center".into(),ParamValue::Pair(0.0,0.0));
        p.insert("sphere_radius".into(),ParamValue::Real(1.0));
        p.insert("randomize_order".into(),ParamValue::Bool(true));
        p.insert("all_combinations".into(),ParamValue::Bool(true));
        p
    }

    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError> {
        let p = ctx.params;
        let spec = ParamSpec::tuple(&[p.value("rv_ratio")?,p.value("trajectory_type")?]);
        let sample = selectors.select("rv_ratio_trajectory",&spec,ctx.epoch_index,ctx.all_combinations(),ctx.randomize_order())?;
        let rv_ratio = sampled_real(&sample,0,"rv_ratio")?;
        let trajectory_type = sampled_text(&sample,1,"trajectory_type")?;
        let start_size = p.real("start_size")?;
        let end_size = p.real("end_size")?;
        let stim_time = ctx.timing.stim_time;

        let mut samples = loom_radius(rv_ratio,stim_time,start_size,end_size);
        if samples.is_empty() {
            samples.push((0.0,start_size/2.0));
        }
        let radius = match trajectory_type.as_str() {
            "expanding" => TvPairs::linear(samples),
            "contracting" => {
                let (times,mut values):(Vec<f64>,Vec<f64>) = samples.into_iter().unzip();
                values.reverse();
                TvPairs::linear(times.into_iter().zip(values).collect())
            }
            "randomized" => {
                let (times,mut values):(Vec<f64>,Vec<f64>) = samples.into_iter().unzip();
                values.shuffle(selectors.rng());
                TvPairs::new(times.into_iter().zip(values).collect(),Interpolation::Previous)
            }
            other => return Err(ProtocolError::InvalidProtocolParameters(
                format!("trajectory_type must be expanding, contracting or randomized, got {}",other)
            ))
        };
        let (theta,phi) = ctx.center("center")?;

        let stimulus = json!({
            "name":"MovingSpot",
            "radius":radius.to_json(),
            "sphere_radius":p.real("sphere_radius")?,
            "color":ctx.json("color")?,
            "theta":theta,
            "phi":phi,
        });
        Ok(EpochSpec::single(stimulus)?
            .with("current_rv_ratio",rv_ratio)
            .with("current_trajectory_type",trajectory_type)
            .with("loom",loom(rv_ratio,stim_time,start_size,end_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunTiming;

    fn build(trajectory_type:&str) -> Result<EpochSpec,ProtocolError> {
        let mut params = LoomingSpot.protocol_parameter_defaults();
        params.insert("rv_ratio".into(),ParamValue::Real(0.04));
        params.insert("trajectory_type".into(),ParamValue::from(trajectory_type));
        let t = RunTiming { num_epochs:1, pre_time:0.5, stim_time:1.0, tail_time:0.5, idle_color:0.5, do_loco:false };
        let ctx = EpochContext { epoch_index:0, timing:&t, params:&params, screen_center:(0.0,0.0) };
        LoomingSpot.build_epoch(&ctx,&mut SelectorState::seeded(3))
    }

    fn radius_values(spec:&EpochSpec) -> Vec<f64> {
        spec.stimuli[0]["radius"]["tv_pairs"].as_array().unwrap()
            .iter().map(|p| p[1].as_f64().unwrap()).collect()
    }

    #[test]
    fn expanding_and_contracting_mirror(){
        let grow = radius_values(&build("expanding").unwrap());
        let mut shrink = radius_values(&build("contracting").unwrap());
        assert!((grow[0] - 1.25).abs() < 1.0E-9);
        assert!((shrink[0] - 40.0).abs() < 1.0E-9);
        shrink.reverse();
        assert_eq!(grow,shrink);
    }

    #[test]
    fn randomized_is_a_permutation(){
        let spec = build("randomized").unwrap();
        assert_eq!(spec.stimuli[0]["radius"]["kind"],"previous");
        let mut shuffled = radius_values(&spec);
        let mut grow = radius_values(&build("expanding").unwrap());
        shuffled.sort_by(|a,b| a.partial_cmp(b).unwrap());
        grow.sort_by(|a,b| a.partial_cmp(b).unwrap());
        assert_eq!(shuffled,grow);
    }

    #[test]
    fn unknown_trajectory_type_is_refused(){
        assert!(matches!(build("sideways"),Err(ProtocolError::InvalidProtocolParameters(_))));
    }
}
