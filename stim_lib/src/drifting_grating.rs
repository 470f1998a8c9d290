use serde_json::json;
use crate::params::{ParamValue, Params, ParamsExt};
use crate::protocol::{sampled_real, EpochContext, EpochSpec, ProtocolError, StimulusProtocol};
use crate::selector::{ParamSpec, SelectorState};

/// Rotating grating on a cylinder. Period, rate and angle may each be swept.
#[derive(Clone,Debug,Default)]
pub struct DriftingGrating;

impl StimulusProtocol for DriftingGrating {

    fn protocol_id(&self) -> String {
        String::from("DriftingGrating")
    }

    fn protocol_parameter_defaults(&self) -> Params {
        let mut p = Params::new();
        p.insert("period".into(),ParamValue::Real(20.0));
        p.insert("rate".into(),ParamValue::Real(20.0));
        p.insert("contrast".into(),ParamValue::Real(1.0));
        p.insert("mean".into(),ParamValue::Real(0.5));
        p.insert("angle".into(),ParamValue::from(vec![0.0,45.0,90.0,135.0,180.0,225.0,270.0,315.0]));
        p.insert("profile".into(),ParamValue::from("square"));
        p.insert("center".into(),ParamValue::Pair(0.0,0.0));
        p.insert("cylinder_radius".into(),ParamValue::Real(1.0));
        p.insert("cylinder_height".into(),ParamValue::Real(10.0));
        p.insert("randomize_order".into(),ParamValue::Bool(true));
        p.insert("all_combinations".into(),ParamValue::Bool(true));
        p
    }

    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError> {
        let p = ctx.params;
        let spec = ParamSpec::tuple(&[p.value("period")?,p.value("rate")?,p.value("angle")?]);
        let sample = selectors.select("period_rate_angle",&spec,ctx.epoch_index,ctx.all_combinations(),ctx.randomize_order())?;
        let period = sampled_real(&sample,0,"period")?;
        let rate = sampled_real(&sample,1,"rate")?;
        let angle = sampled_real(&sample,2,"angle")?;
        let (theta,phi) = ctx.center("center")?;

        let stimulus = json!({
            "name":"RotatingGrating",
            "period":period,
            "rate":rate,
            "color":[1,1,1,1],
            "mean":p.real("mean")?,
            "contrast":p.real("contrast")?,
            "angle":angle,
            "offset":0.0,
            "cylinder_radius":p.real("cylinder_radius")?,
            "cylinder_height":p.real("cylinder_height")?,
            "profile":p.text("profile")?,
            "theta":theta,
            "phi":phi,
        });
        Ok(EpochSpec::single(stimulus)?
            .with("current_period",period)
            .with("current_rate",rate)
            .with("current_angle",angle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunTiming;

    fn timing() -> RunTiming {
        RunTiming { num_epochs:4, pre_time:1.0, stim_time:4.0, tail_time:1.0, idle_color:0.5, do_loco:false }
    }

    #[test]
    fn grating_follows_the_screen_center(){
        let mut params = DriftingGrating.protocol_parameter_defaults();
        params.insert("center".into(),ParamValue::Pair(10.0,5.0));
        params.insert("randomize_order".into(),ParamValue::Bool(false));
        let t = timing();
        let ctx = EpochContext { epoch_index:1, timing:&t, params:&params, screen_center:(90.0,0.0) };
        let spec = DriftingGrating.build_epoch(&ctx,&mut SelectorState::seeded(0)).unwrap();
        let s = &spec.stimuli[0];
        assert_eq!(s["name"],"RotatingGrating");
        assert_eq!(s["theta"],json!(100.0));
        assert_eq!(s["phi"],json!(5.0));
        // ordered product, epoch 1 picks the second angle
        assert_eq!(s["angle"],json!(45.0));
        assert_eq!(spec.convenience["current_angle"],json!(45.0));
    }

    #[test]
    fn period_and_angle_sweeps_cross(){
        let mut params = DriftingGrating.protocol_parameter_defaults();
        params.insert("period".into(),ParamValue::from(vec![10.0,20.0]));
        params.insert("angle".into(),ParamValue::from(vec![0.0,90.0]));
        params.insert("randomize_order".into(),ParamValue::Bool(false));
        let t = timing();
        let mut s = SelectorState::seeded(0);
        let drawn:Vec<(f64,f64)> = (0..4).map(|k|{
            let ctx = EpochContext { epoch_index:k, timing:&t, params:&params, screen_center:(0.0,0.0) };
            let spec = DriftingGrating.build_epoch(&ctx,&mut s).unwrap();
            (spec.stimuli[0]["period"].as_f64().unwrap(),spec.stimuli[0]["angle"].as_f64().unwrap())
        }).collect();
        assert_eq!(drawn,vec![(10.0,0.0),(10.0,90.0),(20.0,0.0),(20.0,90.0)]);
    }
}
