use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct QuestionKey {
    pub id: String,
    pub marks: i64,
    pub options: Vec<OptionKey>,
}

#[derive(Debug, Clone)]
pub struct OptionKey {
    pub id: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone)]
pub struct AnswerInput {
    pub question_id: String,
    pub selected_option_id: Option<String>,
}

/// One row to persist per graded answer. `selected_option_id` is None when
/// the student left the question blank or referenced an option id that does
/// not belong to the question.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerRecord {
    pub submission_id: String,
    pub question_id: String,
    pub selected_option_id: Option<String>,
}

/// Scores a submission against the answer key. Pure: no storage access, no
/// partial writes; the caller persists the score and records atomically.
///
/// Answers referencing questions outside the quiz are dropped silently.
/// Valid questions the student never referenced produce no record at all,
/// while a referenced question with an unmatched option id still gets a
/// record with an absent option.
pub fn evaluate(
    questions: &[QuestionKey],
    submission_id: &str,
    answers: &[AnswerInput],
) -> (i64, Vec<AnswerRecord>) {
    let by_id: HashMap<&str, &QuestionKey> =
        questions.iter().map(|q| (q.id.as_str(), q)).collect();

    let mut total_score = 0_i64;
    let mut records: Vec<AnswerRecord> = Vec::new();

    for ans in answers {
        let Some(question) = by_id.get(ans.question_id.as_str()) else {
            continue;
        };

        let selected = ans.selected_option_id.as_deref().and_then(|wanted| {
            question.options.iter().find(|opt| opt.id == wanted)
        });

        if selected.map(|opt| opt.is_correct).unwrap_or(false) {
            total_score += question.marks;
        }

        records.push(AnswerRecord {
            submission_id: submission_id.to_string(),
            question_id: question.id.clone(),
            selected_option_id: selected.map(|opt| opt.id.clone()),
        });
    }

    (total_score, records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_question_quiz() -> Vec<QuestionKey> {
        vec![QuestionKey {
            id: "q1".into(),
            marks: 5,
            options: vec![
                OptionKey {
                    id: "opt-a".into(),
                    is_correct: true,
                },
                OptionKey {
                    id: "opt-b".into(),
                    is_correct: false,
                },
            ],
        }]
    }

    #[test]
    fn correct_option_earns_question_marks() {
        let quiz = one_question_quiz();
        let answers = vec![AnswerInput {
            question_id: "q1".into(),
            selected_option_id: Some("opt-a".into()),
        }];
        let (score, records) = evaluate(&quiz, "sub1", &answers);
        assert_eq!(score, 5);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].selected_option_id.as_deref(), Some("opt-a"));
    }

    #[test]
    fn wrong_option_earns_nothing_but_is_recorded() {
        let quiz = one_question_quiz();
        let answers = vec![AnswerInput {
            question_id: "q1".into(),
            selected_option_id: Some("opt-b".into()),
        }];
        let (score, records) = evaluate(&quiz, "sub1", &answers);
        assert_eq!(score, 0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].selected_option_id.as_deref(), Some("opt-b"));
    }

    #[test]
    fn empty_answer_list_yields_no_records() {
        let quiz = one_question_quiz();
        let (score, records) = evaluate(&quiz, "sub1", &[]);
        assert_eq!(score, 0);
        assert!(records.is_empty());
    }

    #[test]
    fn unknown_question_is_dropped_silently() {
        let quiz = one_question_quiz();
        let answers = vec![AnswerInput {
            question_id: "not-in-quiz".into(),
            selected_option_id: Some("opt-a".into()),
        }];
        let (score, records) = evaluate(&quiz, "sub1", &answers);
        assert_eq!(score, 0);
        assert!(records.is_empty());
    }

    #[test]
    fn unmatched_option_id_records_an_absent_selection() {
        let quiz = one_question_quiz();
        let answers = vec![AnswerInput {
            question_id: "q1".into(),
            selected_option_id: Some("opt-from-another-question".into()),
        }];
        let (score, records) = evaluate(&quiz, "sub1", &answers);
        assert_eq!(score, 0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].selected_option_id, None);
    }

    #[test]
    fn blank_answer_records_an_absent_selection() {
        let quiz = one_question_quiz();
        let answers = vec![AnswerInput {
            question_id: "q1".into(),
            selected_option_id: None,
        }];
        let (score, records) = evaluate(&quiz, "sub1", &answers);
        assert_eq!(score, 0);
        assert_eq!(
            records,
            vec![AnswerRecord {
                submission_id: "sub1".into(),
                question_id: "q1".into(),
                selected_option_id: None,
            }]
        );
    }

    #[test]
    fn multiple_questions_sum_their_marks() {
        let mut quiz = one_question_quiz();
        quiz.push(QuestionKey {
            id: "q2".into(),
            marks: 3,
            options: vec![
                OptionKey {
                    id: "opt-c".into(),
                    is_correct: false,
                },
                OptionKey {
                    id: "opt-d".into(),
                    is_correct: true,
                },
            ],
        });
        let answers = vec![
            AnswerInput {
                question_id: "q1".into(),
                selected_option_id: Some("opt-a".into()),
            },
            AnswerInput {
                question_id: "q2".into(),
                selected_option_id: Some("opt-d".into()),
            },
        ];
        let (score, records) = evaluate(&quiz, "sub1", &answers);
        assert_eq!(score, 8);
        assert_eq!(records.len(), 2);
    }
}
