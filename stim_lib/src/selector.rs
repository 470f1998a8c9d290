/*
    Per-epoch parameter selection.

    A spec is materialised into a list of concrete samples on the first epoch of a run. Epoch k draws
    sequence[k mod len]. With randomize_order the list is shuffled at materialisation and again at the
    start of every later sweep, so each block of len epochs is a complete, independently permuted sweep.
 */
use std::collections::HashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use crate::params::ParamValue;
use crate::protocol::ProtocolError;

#[derive(Clone,Debug,PartialEq)]
pub enum ParamSpec {
    /// one value per epoch
    Values(Vec<ParamValue>),
    /// several lists sampled together, either zipped or as a cartesian product
    Tuple(Vec<Vec<ParamValue>>),
}

impl ParamSpec {

    pub fn from_value(value:&ParamValue) -> Self {
        ParamSpec::Values(value.values())
    }

    pub fn tuple(values:&[&ParamValue]) -> Self {
        ParamSpec::Tuple(values.iter().map(|v| v.values()).collect())
    }

    fn materialize(&self,all_combinations:bool) -> Result<Vec<Vec<ParamValue>>,ProtocolError> {
        let sequence = match self {
            ParamSpec::Values(values) => values.iter().map(|v| vec![v.clone()]).collect(),
            ParamSpec::Tuple(lists) => {
                if lists.iter().any(|l| l.is_empty()) {
                    return Err(ProtocolError::InvalidSpec(String::from("parameter lists must not be empty")))
                }
                match all_combinations {
                    true => cartesian_product(lists),
                    false => zipped(lists)?
                }
            }
        };
        match sequence.is_empty() {
            true => Err(ProtocolError::InvalidSpec(String::from("parameter spec has no values"))),
            false => Ok(sequence)
        }
    }
}

// last list varies fastest
fn cartesian_product(lists:&[Vec<ParamValue>]) -> Vec<Vec<ParamValue>> {
    lists.iter().fold(vec![Vec::new()],|acc,list|{
        acc.iter().flat_map(|prefix|{
            list.iter().map(move |item|{
                let mut combo = prefix.clone();
                combo.push(item.clone());
                combo
            })
        }).collect()
    })
}

fn zipped(lists:&[Vec<ParamValue>]) -> Result<Vec<Vec<ParamValue>>,ProtocolError> {
    let n = lists.first().map(|l| l.len()).unwrap_or(0);
    if lists.iter().any(|l| l.len() != n) {
        let lengths:Vec<usize> = lists.iter().map(|l| l.len()).collect();
        return Err(ProtocolError::InvalidSpec(format!("zipped parameter lists must have equal lengths, got {:?}",lengths)))
    }
    Ok((0..n).map(|i| lists.iter().map(|l| l[i].clone()).collect()).collect())
}

/// Sweep state carried across epochs of one run. Owned by whoever drives the run.
#[derive(Debug)]
pub struct SelectorState {
    sequences:HashMap<String,Vec<Vec<ParamValue>>>,
    namespace:String,
    rng:StdRng,
}

impl SelectorState {

    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed:u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng:StdRng) -> Self {
        Self {
            sequences:HashMap::new(),
            namespace:String::new(),
            rng,
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// forget materialised sequences. The random stream continues.
    pub fn reset(&mut self) {
        self.sequences.clear();
    }

    /// run f with keys prefixed by namespace so nested protocols keep separate sweeps
    pub fn scoped<T,F>(&mut self,namespace:&str,f:F) -> T
    where F:FnOnce(&mut SelectorState) -> T
    {
        let inner = format!("{}{}/",self.namespace,namespace);
        let outer = std::mem::replace(&mut self.namespace,inner);
        let out = f(self);
        self.namespace = outer;
        out
    }

    pub fn select(&mut self,key:&str,spec:&ParamSpec,epoch_index:usize,all_combinations:bool,randomize_order:bool) -> Result<Vec<ParamValue>,ProtocolError> {
        let key = format!("{}{}",self.namespace,key);
        if epoch_index == 0 || !self.sequences.contains_key(&key) {
            let mut sequence = spec.materialize(all_combinations)?;
            if randomize_order {
                sequence.shuffle(&mut self.rng);
            }
            self.sequences.insert(key.clone(),sequence);
        }
        let sequence = self.sequences.get_mut(&key)
            .ok_or_else(|| ProtocolError::InvalidSpec(format!("no sequence for {}",key)))?;
        let draw = epoch_index % sequence.len();
        if draw == 0 && epoch_index > 0 && randomize_order {
            sequence.shuffle(&mut self.rng);
        }
        Ok(sequence[draw].clone())
    }

    /// single list (or scalar) selection
    pub fn select_one(&mut self,key:&str,value:&ParamValue,epoch_index:usize,randomize_order:bool) -> Result<ParamValue,ProtocolError> {
        let mut sample = self.select(key,&ParamSpec::from_value(value),epoch_index,false,randomize_order)?;
        sample.pop().ok_or_else(|| ProtocolError::InvalidSpec(format!("empty sample for {}",key)))
    }
}

impl Default for SelectorState {
    fn default() -> Self {
        Self::new()
    }
}
