use super::{CheckError, CheckHandler, CheckResult, CheckState};

pub struct CheckDummy;

impl CheckHandler for CheckDummy {
    fn check(&self, args: &[String]) -> Result<CheckResult, CheckError> {
        let Some((state, text)) = args.split_first() else {
            return Ok(CheckResult::new(CheckState::Ok, "OK"));
        };
        let state: CheckState = state.parse()?;
        let output = if text.is_empty() {
            state.to_string()
        } else {
            text.join(" ")
        };
        Ok(CheckResult::new(state, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_state_and_text() {
        let result = CheckDummy
            .check(&["1".to_string(), "a=b".to_string(), "c".to_string()])
            .expect("check");
        assert_eq!(result.state, CheckState::Warning);
        assert_eq!(result.output, "a=b c");
    }

    #[test]
    fn defaults_to_ok() {
        let result = CheckDummy.check(&[]).expect("check");
        assert_eq!(result.state, CheckState::Ok);
        assert!(CheckDummy.check(&["7".to_string()]).is_err());
    }
}
