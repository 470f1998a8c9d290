use serde_json::json;
use crate::params::{ParamValue, Params, ParamsExt};
use crate::protocol::{sampled_real, EpochContext, EpochSpec, ProtocolError, StimulusProtocol};
use crate::selector::{ParamSpec, SelectorState};
use crate::trajectory::moving_patch;

/// Rectangular patch moving through the center along a swept set of directions.
#[derive(Clone,Debug,Default)]
pub struct MovingPatch;

impl MovingPatch {
    fn distance_to_travel(params:&Params) -> Result<Option<f64>,ProtocolError> {
        match params.get("distance_to_travel") {
            None | Some(ParamValue::Null) => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(||{
                ProtocolError::InvalidProtocolParameters(String::from("distance_to_travel must be a number or null"))
            })
        }
    }
}

impl StimulusProtocol for MovingPatch {

    fn protocol_id(&self) -> String {
        String::from("MovingPatch")
    }

    fn protocol_parameter_defaults(&self) -> Params {
        let mut p = Params::new();
        p.insert("width".into(),ParamValue::Real(5.0));
        p.insert("height".into(),ParamValue::Real(5.0));
        p.insert("sphere_radius".into(),ParamValue::Real(1.0));
        p.insert("color".into(),ParamValue::Real(0.0));
        p.insert("center".into(),ParamValue::Pair(0.0,0.0));
        p.insert("speed".into(),ParamValue::Real(80.0));
        p.insert("angle".into(),ParamValue::from(vec![0.0,90.0,180.0,270.0]));
        p.insert("distance_to_travel".into(),ParamValue::Null);
        p.insert("closed_loop".into(),ParamValue::Bool(false));
        p.insert("randomize_order".into(),ParamValue::Bool(true));
        p.insert("all_combinations".into(),ParamValue::Bool(true));
        p
    }

    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError> {
        let p = ctx.params;
        let spec = ParamSpec::tuple(&[p.value("speed")?,p.value("angle")?]);
        let sample = selectors.select("speed_angle",&spec,ctx.epoch_index,ctx.all_combinations(),ctx.randomize_order())?;
        let speed = sampled_real(&sample,0,"speed")?;
        let angle = sampled_real(&sample,1,"angle")?;

        let traj = moving_patch(ctx.center("center")?,angle,speed,ctx.timing.stim_time,Self::distance_to_travel(p)?);

        let stimulus = json!({
            "name":"MovingPatch",
            "width":p.real("width")?,
            "height":p.real("height")?,
            "sphere_radius":p.real("sphere_radius")?,
            "color":ctx.json("color")?,
            "theta":traj.theta.to_json(),
            "phi":traj.phi.to_json(),
            "angle":angle,
        });
        Ok(EpochSpec::single(stimulus)?
            .with("current_speed",speed)
            .with("current_angle",angle)
            .with("travel_time",traj.travel_time)
            .with("travel_distance",traj.distance))
    }

    fn supports_closed_loop(&self,params:&Params) -> bool {
        params.flag("closed_loop").unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunTiming;

    #[test]
    fn patch_trajectory_is_centered(){
        let mut params = MovingPatch.protocol_parameter_defaults();
        params.insert("center".into(),ParamValue::Pair(0.0,10.0));
        params.insert("angle".into(),ParamValue::Real(0.0));
        params.insert("speed".into(),ParamValue::Real(20.0));
        let t = RunTiming { num_epochs:1, pre_time:0.5, stim_time:2.0, tail_time:0.5, idle_color:0.5, do_loco:false };
        let ctx = EpochContext { epoch_index:0, timing:&t, params:&params, screen_center:(90.0,0.0) };
        let spec = MovingPatch.build_epoch(&ctx,&mut SelectorState::seeded(1)).unwrap();
        let theta = &spec.stimuli[0]["theta"];
        assert_eq!(theta["name"],"tv_pairs");
        assert_eq!(theta["tv_pairs"],json!([[0.0,70.0],[2.0,110.0]]));
        assert_eq!(spec.stimuli[0]["phi"]["tv_pairs"],json!([[0.0,10.0],[2.0,10.0]]));
        assert_eq!(spec.convenience["travel_distance"],json!(40.0));
    }

    #[test]
    fn closed_loop_follows_the_flag(){
        let mut params = MovingPatch.protocol_parameter_defaults();
        assert!(!MovingPatch.supports_closed_loop(&params));
        params.insert("closed_loop".into(),ParamValue::Bool(true));
        assert!(MovingPatch.supports_closed_loop(&params));
    }

    #[test]
    fn distance_must_be_numeric(){
        let mut params = MovingPatch.protocol_parameter_defaults();
        params.insert("distance_to_travel".into(),ParamValue::from("far"));
        let t = RunTiming { num_epochs:1, pre_time:0.0, stim_time:1.0, tail_time:0.0, idle_color:0.5, do_loco:false };
        let ctx = EpochContext { epoch_index:0, timing:&t, params:&params, screen_center:(0.0,0.0) };
        let err = MovingPatch.build_epoch(&ctx,&mut SelectorState::seeded(1)).unwrap_err();
        assert!(matches!(err,ProtocolError::InvalidProtocolParameters(_)));
    }
}
