use serde_json::json;
use tracing::warn;
use crate::params::{ParamValue, Params, ParamsExt};
use crate::protocol::{sampled_real, EpochContext, EpochSpec, ProtocolError, StimulusProtocol};
use crate::selector::{ParamSpec, SelectorState};
use crate::trajectory::{Interpolation, TvPairs};

/// Full field flash of a swept intensity that returns to the idle color after flash_duration.
#[derive(Clone,Debug,Default)]
pub struct UniformFlash;

impl StimulusProtocol for UniformFlash {

    fn protocol_id(&self) -> String {
        String::from("UniformFlash")
    }

    fn protocol_parameter_defaults(&self) -> Params {
        let mut p = Params::new();
        p.insert("intensity".into(),ParamValue::from(vec![0.0,1.0]));
        p.insert("flash_duration".into(),ParamValue::Real(0.5));
        p.insert("width".into(),ParamValue::Real(360.0));
        p.insert("height".into(),ParamValue::Real(180.0));
        p.insert("sphere_radius".into(),ParamValue::Real(1.0));
        p.insert("randomize_order".into(),ParamValue::Bool(false));
        p
    }

    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError> {
        let p = ctx.params;
        let spec = ParamSpec::from_value(p.value("intensity")?);
        let sample = selectors.select("intensity",&spec,ctx.epoch_index,false,ctx.randomize_order())?;
        let intensity = sampled_real(&sample,0,"intensity")?;
        let stim_time = ctx.timing.stim_time;
        let mut flash_duration = p.real("flash_duration")?;
        if flash_duration > stim_time {
            warn!(flash_duration,stim_time,"flash outlasts stim_time, truncating");
            flash_duration = stim_time;
        }
        let color = TvPairs::new(vec![(0.0,intensity),(flash_duration,ctx.timing.idle_color)],Interpolation::Previous);
        // covers the screen, so only the rig's screen center positions it
        let (theta,phi) = ctx.screen_center;

        let stimulus = json!({
            "name":"MovingPatch",
            "width":p.real("width")?,
            "height":p.real("height")?,
            "sphere_radius":p.real("sphere_radius")?,
            "color":color.to_json(),
            "theta":theta,
            "phi":phi,
            "angle":0.0,
        });
        Ok(EpochSpec::single(stimulus)?
            .with("current_intensity",intensity)
            .with("actual_stim_duration",flash_duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunTiming;

    #[test]
    fn flash_returns_to_idle(){
        let params = UniformFlash.protocol_parameter_defaults();
        let t = RunTiming { num_epochs:2, pre_time:0.5, stim_time:1.0, tail_time:0.5, idle_color:0.25, do_loco:false };
        let mut s = SelectorState::seeded(0);
        let ctx = EpochContext { epoch_index:1, timing:&t, params:&params, screen_center:(0.0,0.0) };
        let spec = UniformFlash.build_epoch(&ctx,&mut s).unwrap();
        let color = &spec.stimuli[0]["color"];
        assert_eq!(color["kind"],"previous");
        assert_eq!(color["tv_pairs"],json!([[0.0,1.0],[0.5,0.25]]));
        assert_eq!(spec.convenience["actual_stim_duration"],json!(0.5));
    }
}
