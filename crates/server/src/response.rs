use serde::Serialize;

use crate::jotform::Submission;

/// Wire response for one handled submission: the registrant fields passed
/// through plus both validation verdicts. Field names mirror what the form
/// platform integration has always received.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResponse {
    #[serde(flatten)]
    pub submission: Submission,
    /// `None` when the registrant did not claim PR status (the check never
    /// ran).
    #[serde(rename = "PR_Success")]
    pub pr_success: Option<bool>,
    #[serde(rename = "PR_Error", skip_serializing_if = "Option::is_none")]
    pub pr_error: Option<String>,
    #[serde(rename = "E_Transfer_Success")]
    pub e_transfer_success: bool,
    #[serde(rename = "E_Transfer_Error", skip_serializing_if = "Option::is_none")]
    pub e_transfer_error: Option<String>,
    #[serde(rename = "Email_Send", skip_serializing_if = "Option::is_none")]
    pub email_send: Option<bool>,
    #[serde(rename = "Email_Error_Message", skip_serializing_if = "Option::is_none")]
    pub email_error_message: Option<String>,
}

impl ValidationResponse {
    /// The registration as a whole passed: e-transfer reconciled, and the PR
    /// card verified whenever one was required.
    pub fn overall_success(&self) -> bool {
        self.e_transfer_success && self.pr_success.unwrap_or(true)
    }

    /// Every failure reason, in presentation order.
    pub fn failure_reasons(&self) -> Vec<&str> {
        let mut reasons = Vec::new();
        if self.pr_success == Some(false) {
            reasons.push(self.pr_error.as_deref().unwrap_or("PR validation failed"));
        }
        if !self.e_transfer_success {
            reasons.push(
                self.e_transfer_error
                    .as_deref()
                    .unwrap_or("E-transfer validation failed"),
            );
        }
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> Submission {
        Submission {
            form_id: Some("243138058138255".to_string()),
            submission_id: Some("6070135805971446099".to_string()),
            full_name: "Mohammad Farzam".to_string(),
            email: Some("m.farzam@example.org".to_string()),
            phone_number: None,
            pr_status: false,
            pr_card_number: None,
            amount_of_payment: "546".to_string(),
            payer_full_name: "Mohammad Farzam".to_string(),
            pr_file_upload_urls: vec![],
            e_transfer_file_upload_urls: vec![],
        }
    }

    fn response() -> ValidationResponse {
        ValidationResponse {
            submission: submission(),
            pr_success: None,
            pr_error: None,
            e_transfer_success: true,
            e_transfer_error: None,
            email_send: None,
            email_error_message: None,
        }
    }

    #[test]
    fn pr_check_only_counts_when_it_ran() {
        let mut res = response();
        assert!(res.overall_success());

        res.pr_success = Some(false);
        assert!(!res.overall_success());

        res.pr_success = Some(true);
        assert!(res.overall_success());
    }

    #[test]
    fn failure_reasons_collect_both_checks() {
        let mut res = response();
        res.pr_success = Some(false);
        res.pr_error = Some("PR card does not match".to_string());
        res.e_transfer_success = false;
        res.e_transfer_error = Some("no unused records found".to_string());
        assert_eq!(
            res.failure_reasons(),
            vec!["PR card does not match", "no unused records found"]
        );
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let value = serde_json::to_value(response()).unwrap();
        assert_eq!(value["E_Transfer_Success"], true);
        assert_eq!(value["Full_Name"], "Mohammad Farzam");
        assert_eq!(value["PR_Success"], serde_json::Value::Null);
        // Absent errors are omitted entirely.
        assert!(value.get("E_Transfer_Error").is_none());
    }
}
