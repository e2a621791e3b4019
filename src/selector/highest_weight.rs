use async_trait::async_trait;

use super::{eligible, no_eligible_host, HostSelector, Properties};
use crate::host::Host;
use crate::Result;

/// Returns the eligible host with the maximum `weight`, ties broken by first occurrence.
///
/// Note: the weight formula in [`crate::topology::query`] encodes "worse = higher" (lag
/// dominates, lower is better overall), yet this selector picks the numeric *maximum*. That
/// asymmetry is inherited from the source system and preserved deliberately — see the note on
/// `HighestWeightSelector` in `DESIGN.md`, "Open Questions".
#[derive(Clone, Copy, Debug, Default)]
pub struct HighestWeightSelector;

#[async_trait]
impl HostSelector for HighestWeightSelector {
    async fn select(&self, hosts: &[Host], want_writer: bool, _properties: &Properties) -> Result<Host> {
        let candidates = eligible(hosts, want_writer);
        candidates
            .into_iter()
            .fold(None::<Host>, |best, candidate| match best {
                Some(ref b) if b.weight >= candidate.weight => best,
                _ => Some(candidate),
            })
            .ok_or_else(no_eligible_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host as H;

    #[tokio::test]
    async fn picks_maximum_weight() {
        let hosts = vec![
            H::new("a", 1).with_weight(5),
            H::new("b", 1).with_weight(9),
            H::new("c", 1).with_weight(9),
        ];
        let picked = HighestWeightSelector
            .select(&hosts, false, &Properties::new())
            .await
            .unwrap();
        // ties broken by first occurrence
        assert_eq!(picked.host(), "b");
    }
}
