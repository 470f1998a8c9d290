use serde_json::json;
use crate::params::{ParamValue, Params, ParamsExt};
use crate::protocol::{sampled_real, EpochContext, EpochSpec, ProtocolError, StimulusProtocol};
use crate::selector::{ParamSpec, SelectorState};
use crate::trajectory::sinusoid;

/// Stationary patch whose intensity oscillates about mean.
#[derive(Clone,Debug,Default)]
pub struct FlickeringPatch;

impl StimulusProtocol for FlickeringPatch {

    fn protocol_id(&self) -> String {
        String::from("FlickeringPatch")
    }

    fn protocol_parameter_defaults(&self) -> Params {
        let mut p = Params::new();
        p.insert("width".into(),ParamValue::Real(10.0));
        p.insert("height".into(),ParamValue::Real(10.0));
        p.insert("sphere_radius".into(),ParamValue::Real(1.0));
        p.insert("center".into(),ParamValue::Pair(0.0,0.0));
        p.insert("mean".into(),ParamValue::Real(0.5));
        p.insert("contrast".into(),ParamValue::Real(1.0));
        p.insert("temporal_frequency".into(),ParamValue::from(vec![1.0,2.0,4.0,8.0]));
        p.insert("randomize_order".into(),ParamValue::Bool(true));
        p
    }

    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError> {
        let p = ctx.params;
        let spec = ParamSpec::from_value(p.value("temporal_frequency")?);
        let sample = selectors.select("temporal_frequency",&spec,ctx.epoch_index,false,ctx.randomize_order())?;
        let temporal_frequency = sampled_real(&sample,0,"temporal_frequency")?;
        let mean = p.real("mean")?;
        let contrast = p.real("contrast")?;
        let (theta,phi) = ctx.center("center")?;

        let stimulus = json!({
            "name":"MovingPatch",
            "width":p.real("width")?,
            "height":p.real("height")?,
            "sphere_radius":p.real("sphere_radius")?,
            "color":sinusoid(temporal_frequency,mean*contrast,mean),
            "theta":theta,
            "phi":phi,
            "angle":0.0,
        });
        Ok(EpochSpec::single(stimulus)?.with("current_temporal_frequency",temporal_frequency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunTiming;

    #[test]
    fn color_oscillates_about_mean(){
        let mut params = FlickeringPatch.protocol_parameter_defaults();
        params.insert("mean".into(),ParamValue::Real(0.4));
        params.insert("contrast".into(),ParamValue::Real(0.5));
        params.insert("randomize_order".into(),ParamValue::Bool(false));
        let t = RunTiming { num_epochs:4, pre_time:0.5, stim_time:2.0, tail_time:0.5, idle_color:0.5, do_loco:false };
        let ctx = EpochContext { epoch_index:2, timing:&t, params:&params, screen_center:(0.0,0.0) };
        let spec = FlickeringPatch.build_epoch(&ctx,&mut SelectorState::seeded(0)).unwrap();
        let color = &spec.stimuli[0]["color"];
        assert_eq!(color["name"],"Sinusoid");
        assert_eq!(color["temporal_frequency"],json!(4.0));
        assert_eq!(color["amplitude"],json!(0.2));
        assert_eq!(color["offset"],json!(0.4));
    }
}
