/*
    Time varying stimulus parameters.

    A tv_pairs trajectory is a list of (t, v) samples. At time t the parameter equals v; between
    samples the interpolation kind decides: linear interpolation or hold the previous value.
    The renderer is expected to honour the same semantics.
 */
use serde::{Serialize,Deserialize};
use serde_json::{json, Value};
use tracing::warn;

/// loom curves are sampled every millisecond
pub const LOOM_TIME_STEP:f64 = 0.001;

#[derive(Clone,Copy,Debug,PartialEq,Eq,Serialize,Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Linear,
    Previous,
}

impl Interpolation {
    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::Linear => "linear",
            Interpolation::Previous => "previous",
        }
    }
}

#[derive(Clone,Debug,PartialEq)]
pub struct TvPairs {
    pub pairs:Vec<(f64,f64)>,
    pub kind:Interpolation,
}

impl TvPairs {

    pub fn new(pairs:Vec<(f64,f64)>,kind:Interpolation) -> Self {
        Self { pairs, kind }
    }

    pub fn linear(pairs:Vec<(f64,f64)>) -> Self {
        Self::new(pairs,Interpolation::Linear)
    }

    pub fn to_json(&self) -> Value {
        let pairs:Vec<Value> = self.pairs.iter().map(|(t,v)| json!([t,v])).collect();
        json!({
            "name":"tv_pairs",
            "tv_pairs":pairs,
            "kind":self.kind.name(),
        })
    }

    pub fn start_value(&self) -> Option<f64> {
        self.pairs.first().map(|(_,v)| *v)
    }

    pub fn end_value(&self) -> Option<f64> {
        self.pairs.last().map(|(_,v)| *v)
    }

    pub fn duration(&self) -> f64 {
        match (self.pairs.first(),self.pairs.last()) {
            (Some((t0,_)),Some((t1,_))) => t1 - t0,
            _=> 0.0
        }
    }

    /// evaluate at time t. Values are held beyond either end.
    pub fn value_at(&self,t:f64) -> Option<f64> {
        let first = self.pairs.first()?;
        if t <= first.0 {
            return Some(first.1)
        }
        for w in self.pairs.windows(2) {
            let (t0,v0) = w[0];
            let (t1,v1) = w[1];
            if t < t1 {
                return match self.kind {
                    Interpolation::Previous => Some(v0),
                    Interpolation::Linear => match t1 > t0 {
                        true => Some(v0 + (v1 - v0)*(t - t0)/(t1 - t0)),
                        false => Some(v1),
                    }
                }
            }
        }
        self.end_value()
    }
}

pub fn sinusoid(temporal_frequency:f64,amplitude:f64,offset:f64) -> Value {
    json!({
        "name":"Sinusoid",
        "temporal_frequency":temporal_frequency,
        "amplitude":amplitude,
        "offset":offset,
    })
}

pub fn loom(rv_ratio:f64,stim_time:f64,start_size:f64,end_size:f64) -> Value {
    json!({
        "name":"Loom",
        "rv_ratio":rv_ratio,
        "stim_time":stim_time,
        "start_size":start_size,
        "end_size":end_size,
    })
}

/// every spatial center is offset by the rig's screen center
pub fn adjust_center(center:(f64,f64),screen_center:(f64,f64)) -> (f64,f64) {
    (center.0 + screen_center.0,center.1 + screen_center.1)
}

/// Spot radius over time for an object approaching at constant speed.
/// Angular size is 2*atan(rv/(T - t)), shifted so size(0) = start_size and capped at end_size.
/// Returns (t, radius) samples every LOOM_TIME_STEP over [0, T).
pub fn loom_radius(rv_ratio:f64,stim_time:f64,start_size:f64,end_size:f64) -> Vec<(f64,f64)> {
    let n = ((stim_time - LOOM_TIME_STEP)/LOOM_TIME_STEP - 1.0E-6).ceil().max(0.0) as usize;
    let times:Vec<f64> = (0..n).map(|i| i as f64*LOOM_TIME_STEP).collect();
    let mut size:Vec<f64> = times.iter()
        .map(|t| 2.0*(rv_ratio/(stim_time - t)).atan().to_degrees())
        .collect();
    if let Some(first) = size.first().copied() {
        let shift = first - start_size;
        size.iter_mut().for_each(|s| *s -= shift);
    }
    // hang at end_size once the curve gets there
    if let Some(cap) = size.iter().position(|s| *s > end_size) {
        size[cap..].iter_mut().for_each(|s| *s = end_size);
    }
    times.into_iter().zip(size.into_iter().map(|s| s/2.0)).collect()
}

#[derive(Clone,Debug,PartialEq)]
pub struct PatchTrajectory {
    pub theta:TvPairs,
    pub phi:TvPairs,
    /// time spent moving, at most the stim time
    pub travel_time:f64,
    pub distance:f64,
}

/// Trajectory of a patch moving through center along angle (degrees) at speed (deg/s).
///
/// Without a distance the patch travels speed*stim_time and crosses center at stim_time/2.
/// With a distance it hangs at the start, travels the distance, then hangs at the end, again
/// crossing center at stim_time/2. A traversal longer than stim_time is truncated.
pub fn moving_patch(center:(f64,f64),angle:f64,speed:f64,stim_time:f64,distance_to_travel:Option<f64>) -> PatchTrajectory {
    let (ux,uy) = (angle.to_radians().cos(),angle.to_radians().sin());
    let (cx,cy) = center;

    let along = |d:f64| -> ((f64,f64),(f64,f64)) {
        ((cx - ux*d/2.0,cy - uy*d/2.0),(cx + ux*d/2.0,cy + uy*d/2.0))
    };

    match distance_to_travel {
        None => {
            let d = speed*stim_time;
            let (start,end) = along(d);
            PatchTrajectory {
                theta:TvPairs::linear(vec![(0.0,start.0),(stim_time,end.0)]),
                phi:TvPairs::linear(vec![(0.0,start.1),(stim_time,end.1)]),
                travel_time:stim_time,
                distance:d.abs(),
            }
        }
        Some(distance) => {
            let mut travel_time = match speed == 0.0 {
                true => f64::INFINITY,
                false => (distance/speed).abs(),
            };
            let mut d = distance.abs()*speed.signum();
            if travel_time > stim_time {
                warn!(distance,speed,stim_time,"patch cannot cover distance_to_travel within stim_time, truncating traversal");
                travel_time = stim_time;
                d = speed*stim_time;
            }
            let hang_time = (stim_time - travel_time)/2.0;
            let (start,end) = along(d);
            let times = [0.0,hang_time,hang_time + travel_time,stim_time];
            PatchTrajectory {
                theta:TvPairs::linear(vec![(times[0],start.0),(times[1],start.0),(times[2],end.0),(times[3],end.0)]),
                phi:TvPairs::linear(vec![(times[0],start.1),(times[1],start.1),(times[2],end.1),(times[3],end.1)]),
                travel_time,
                distance:d.abs(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a:f64,b:f64) -> bool {
        (a - b).abs() < 1.0E-9
    }

    #[test]
    fn tv_pairs_serialize_for_the_renderer(){
        let t = TvPairs::new(vec![(0.0,1.0),(0.5,0.5)],Interpolation::Previous);
        let v = t.to_json();
        assert_eq!(v["name"],"tv_pairs");
        assert_eq!(v["kind"],"previous");
        assert_eq!(v["tv_pairs"][1],json!([0.5,0.5]));
    }

    #[test]
    fn interpolation_kinds(){
        let lin = TvPairs::linear(vec![(0.0,0.0),(2.0,10.0)]);
        assert!(close(lin.value_at(1.0).unwrap(),5.0));
        assert!(close(lin.value_at(5.0).unwrap(),10.0));
        let step = TvPairs::new(vec![(0.0,1.0),(0.5,0.5)],Interpolation::Previous);
        assert!(close(step.value_at(0.49).unwrap(),1.0));
        assert!(close(step.value_at(0.5).unwrap(),0.5));
    }

    #[test]
    fn patch_crosses_center_at_half_time(){
        let center = adjust_center((10.0,-5.0),(90.0,5.0));
        let t = moving_patch(center,30.0,40.0,2.0,None);
        assert!(close(t.theta.value_at(1.0).unwrap(),100.0));
        assert!(close(t.phi.value_at(1.0).unwrap(),0.0));
        let mid_theta = (t.theta.start_value().unwrap() + t.theta.end_value().unwrap())/2.0;
        let mid_phi = (t.phi.start_value().unwrap() + t.phi.end_value().unwrap())/2.0;
        assert!(close(mid_theta,100.0));
        assert!(close(mid_phi,0.0));
        assert!(close(t.distance,80.0));
    }

    #[test]
    fn fixed_distance_hangs_at_both_ends(){
        let t = moving_patch((0.0,0.0),0.0,20.0,4.0,Some(40.0));
        assert_eq!(t.theta.pairs.len(),4);
        assert!(close(t.travel_time,2.0));
        assert!(close(t.theta.value_at(0.5).unwrap(),-20.0));
        assert!(close(t.theta.value_at(2.0).unwrap(),0.0));
        assert!(close(t.theta.value_at(3.5).unwrap(),20.0));
    }

    #[test]
    fn long_distance_is_truncated(){
        let t = moving_patch((0.0,0.0),90.0,10.0,1.0,Some(100.0));
        assert!(close(t.travel_time,1.0));
        assert!(close(t.distance,10.0));
        assert!(close(t.phi.value_at(0.5).unwrap(),0.0));
        assert!(close(t.phi.end_value().unwrap(),5.0));
    }

    #[test]
    fn loom_radius_shape(){
        let r = loom_radius(0.04,1.0,2.5,80.0);
        assert_eq!(r.len(),999);
        assert!(close(r[0].1,1.25));
        assert!(r.windows(2).all(|w| w[1].1 >= w[0].1));
        let cap = r.iter().position(|(_,v)| close(*v,40.0)).unwrap();
        assert!(r[cap..].iter().all(|(_,v)| close(*v,40.0)));
        assert!(r[..cap].iter().all(|(_,v)| *v < 40.0));
    }
}
