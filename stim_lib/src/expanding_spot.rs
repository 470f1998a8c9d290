use serde_json::json;
use tracing::warn;
use crate::params::{ParamValue, Params, ParamsExt};
use crate::protocol::{sampled_real, EpochContext, EpochSpec, ProtocolError, StimulusProtocol};
use crate::selector::{ParamSpec, SelectorState};
use crate::trajectory::TvPairs;

/// Spot that grows linearly from start_diameter to end_diameter and then holds.
/// Without an expansion_rate the growth spans the whole stim time.
#[derive(Clone,Debug,Default)]
pub struct ExpandingSpot;

impl StimulusProtocol for ExpandingSpot {

    fn protocol_id(&self) -> String {
        String::from("ExpandingSpot")
    }

    fn protocol_parameter_defaults(&self) -> Params {
        let mut p = Params::new();
        p.insert("start_diameter".into(),ParamValue::Real(5.0));
        p.insert("end_diameter".into(),ParamValue::from(vec![20.0,40.0,60.0]));
        p.insert("expansion_rate".into(),ParamValue::Null);
        p.insert("color".into(),ParamValue::Real(0.0));
        p.insert("center".into(),ParamValue::Pair(0.0,0.0));
        p.insert("sphere_radius".into(),ParamValue::Real(1.0));
        p.insert("randomize_order".into(),ParamValue::Bool(true));
        p
    }

    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError> {
        let p = ctx.params;
        let spec = ParamSpec::from_value(p.value("end_diameter")?);
        let sample = selectors.select("end_diameter",&spec,ctx.epoch_index,false,ctx.randomize_order())?;
        let start_diameter = p.real("start_diameter")?;
        let mut end_diameter = sampled_real(&sample,0,"end_diameter")?;
        let stim_time = ctx.timing.stim_time;

        let rate = match p.get("expansion_rate") {
            None | Some(ParamValue::Null) => None,
            Some(v) => match v.as_f64() {
                Some(r) if r > 0.0 => Some(r),
                _=> return Err(ProtocolError::InvalidProtocolParameters(String::from("expansion_rate must be a positive number or null")))
            }
        };
        let mut duration = match rate {
            Some(r) => (end_diameter - start_diameter).abs()/r,
            None => stim_time,
        };
        if let Some(r) = rate {
            if duration > stim_time {
                warn!(start_diameter,end_diameter,expansion_rate = r,stim_time,"spot cannot reach end_diameter within stim_time, truncating expansion");
                end_diameter = start_diameter + (end_diameter - start_diameter).signum()*r*stim_time;
                duration = stim_time;
            }
        }

        let mut pairs = vec![(0.0,start_diameter/2.0),(duration,end_diameter/2.0)];
        if duration < stim_time {
            pairs.push((stim_time,end_diameter/2.0));
        }
        let radius = TvPairs::linear(pairs);
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
            .with("current_end_diameter",end_diameter)
            .with("actual_stim_duration",duration))
    }
}
