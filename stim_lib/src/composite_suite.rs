/*
    A suite interleaves several child families within one run. Child parameters are exposed with a
    "<child>." prefix plus a "<child>.weight". On prepare the weights become a schedule of num_epochs
    child slots. Each child sees only its own parameters, its own epoch index (how many times it has
    been scheduled before) and its own selector namespace, so every child's sweep stays complete.
 */
use rand::seq::SliceRandom;
use crate::drifting_grating::DriftingGrating;
use crate::looming_spot::LoomingSpot;
use crate::moving_patch::MovingPatch;
use crate::params::{ParamValue, Params};
use crate::protocol::{EpochContext, EpochSpec, ProtocolError, RunTiming, StimulusProtocol};
use crate::selector::SelectorState;

const WEIGHT_KEY:&str = "weight";

#[derive(Clone)]
pub struct CompositeSuite {
    children:Vec<Box<dyn StimulusProtocol>>,
    schedule:Vec<usize>,
}

impl Default for CompositeSuite {
    fn default() -> Self {
        Self::new(vec![Box::new(MovingPatch),Box::new(DriftingGrating),Box::new(LoomingSpot)])
    }
}

impl CompositeSuite {

    pub fn new(children:Vec<Box<dyn StimulusProtocol>>) -> Self {
        Self {
            children,
            schedule:vec![],
        }
    }

    pub fn schedule(&self) -> &[usize] {
        &self.schedule
    }

    /// the parameters of one child with the prefix removed
    fn child_params(params:&Params,child_id:&str) -> Params {
        let prefix = format!("{}.",child_id);
        params.iter()
            .filter_map(|(key,val)| key.strip_prefix(&prefix).map(|k| (k.to_string(),val.clone())))
            .filter(|(key,_)| key != WEIGHT_KEY)
            .collect()
    }

    fn weight(params:&Params,child_id:&str) -> Result<usize,ProtocolError> {
        let key = format!("{}.{}",child_id,WEIGHT_KEY);
        match params.get(&key).map(|v| v.as_i64()) {
            None => Ok(1),
            Some(Some(w)) if w >= 0 => Ok(w as usize),
            _=> Err(ProtocolError::InvalidProtocolParameters(format!("{} must be a non-negative integer",key)))
        }
    }

    /// how many times the child at slot k has been scheduled before k
    fn child_epoch_index(&self,k:usize) -> Option<(usize,usize)> {
        let n = self.schedule.len();
        if n == 0 {
            return None
        }
        let child = self.schedule[k % n];
        let per_cycle = self.schedule.iter().filter(|c| **c == child).count();
        let before = self.schedule[..k % n].iter().filter(|c| **c == child).count();
        Some((child,(k/n)*per_cycle + before))
    }
}

impl StimulusProtocol for CompositeSuite {

    fn protocol_id(&self) -> String {
        String::from("CompositeSuite")
    }

    fn protocol_parameter_defaults(&self) -> Params {
        let mut p = Params::new();
        for child in &self.children {
            let id = child.protocol_id();
            for (key,val) in child.protocol_parameter_defaults() {
                p.insert(format!("{}.{}",id,key),val);
            }
            p.insert(format!("{}.{}",id,WEIGHT_KEY),ParamValue::Int(1));
        }
        p.insert("randomize_order".into(),ParamValue::Bool(true));
        p
    }

    fn precompute(&mut self,timing:&RunTiming,params:&Params,selectors:&mut SelectorState) -> Result<(),ProtocolError> {
        let mut slots = vec![];
        for (i,child) in self.children.iter_mut().enumerate() {
            let id = child.protocol_id();
            let weight = Self::weight(params,&id)?;
            slots.extend(std::iter::repeat(i).take(weight));
            let child_params = Self::child_params(params,&id);
            selectors.scoped(&id,|s| child.precompute(timing,&child_params,s))?;
        }
        if slots.is_empty() {
            return Err(ProtocolError::InvalidProtocolParameters(String::from("suite weights must not all be zero")))
        }
        let mut schedule:Vec<usize> = slots.iter().copied().cycle().take(timing.num_epochs).collect();
        let randomize = params.get("randomize_order").and_then(|v| v.as_bool()).unwrap_or(false);
        if randomize {
            schedule.shuffle(selectors.rng());
        }
        self.schedule = schedule;
        Ok(())
    }

    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError> {
        let (child_index,child_epoch) = self.child_epoch_index(ctx.epoch_index)
            .ok_or_else(|| ProtocolError::InvalidProtocolParameters(String::from("suite has not been prepared")))?;
        let child = &self.children[child_index];
        let id = child.protocol_id();
        let child_params = Self::child_params(ctx.params,&id);
        let child_ctx = EpochContext {
            epoch_index:child_epoch,
            timing:ctx.timing,
            params:&child_params,
            screen_center:ctx.screen_center,
        };
        let spec = selectors.scoped(&id,|s| child.build_epoch(&child_ctx,s))?;
        Ok(spec.with("component_stim_type",id))
    }

    fn supports_closed_loop(&self,params:&Params) -> bool {
        self.children.iter().any(|child|{
            let id = child.protocol_id();
            Self::weight(params,&id).unwrap_or(0) > 0 && child.supports_closed_loop(&Self::child_params(params,&id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Protocol, PROTOCOL_ID_KEY};
    use crate::presets::PresetStore;

    fn timing(n:usize) -> RunTiming {
        RunTiming { num_epochs:n, pre_time:0.0, stim_time:1.0, tail_time:0.0, idle_color:0.5, do_loco:false }
    }

    #[test]
    fn child_parameters_are_prefixed(){
        let suite = CompositeSuite::default();
        let p = suite.protocol_parameter_defaults();
        assert!(p.contains_key("MovingPatch.angle"));
        assert_eq!(p["DriftingGrating.weight"],ParamValue::Int(1));
        let child = CompositeSuite::child_params(&p,"MovingPatch");
        assert!(child.contains_key("speed"));
        assert!(!child.contains_key("weight"));
    }

    #[test]
    fn schedule_honours_weights(){
        let mut suite = CompositeSuite::default();
        let mut p = suite.protocol_parameter_defaults();
        p.insert("MovingPatch.weight".into(),ParamValue::Int(2));
        p.insert("LoomingSpot.weight".into(),ParamValue::Int(0));
        suite.precompute(&timing(9),&p,&mut SelectorState::seeded(5)).unwrap();
        let patches = suite.schedule().iter().filter(|c| **c == 0).count();
        let gratings = suite.schedule().iter().filter(|c| **c == 1).count();
        assert_eq!(suite.schedule().len(),9);
        assert_eq!((patches,gratings),(6,3));
        assert!(!suite.schedule().contains(&2));
    }

    #[test]
    fn zero_weights_are_refused(){
        let mut suite = CompositeSuite::default();
        let mut p = suite.protocol_parameter_defaults();
        for id in ["MovingPatch","DriftingGrating","LoomingSpot"] {
            p.insert(format!("{}.weight",id),ParamValue::Int(0));
        }
        let err = suite.precompute(&timing(3),&p,&mut SelectorState::seeded(0)).unwrap_err();
        assert!(matches!(err,ProtocolError::InvalidProtocolParameters(_)));
    }

    #[test]
    fn child_sweeps_stay_complete(){
        let mut protocol = Protocol::new(Box::new(CompositeSuite::default()),(0.0,0.0),PresetStore::in_memory("CompositeSuite"));
        protocol.set_protocol_parameter("LoomingSpot.weight",ParamValue::Int(0)).unwrap();
        protocol.set_protocol_parameter("MovingPatch.angle",ParamValue::from(vec![0.0,180.0])).unwrap();
        protocol.set_run_parameter("num_epochs",ParamValue::Int(8)).unwrap();
        let mut s = SelectorState::seeded(11);
        protocol.prepare_run(&mut s).unwrap();
        assert_eq!(protocol.run_parameters[PROTOCOL_ID_KEY],ParamValue::from("CompositeSuite"));

        let mut patch_angles = vec![];
        for _ in 0..8 {
            let spec = protocol.get_epoch_parameters(&mut s).unwrap().clone();
            if spec.convenience["component_stim_type"] == "MovingPatch" {
                patch_angles.push(spec.convenience["current_angle"].as_f64().unwrap());
            }
            protocol.advance_epoch_counter();
        }
        assert_eq!(patch_angles.len(),4);
        for pair in patch_angles.chunks(2) {
            let mut pair = pair.to_vec();
            pair.sort_by(|a,b| a.partial_cmp(b).unwrap());
            assert_eq!(pair,vec![0.0,180.0]);
        }
    }
}
