use cifar_cnn::inspect::{parse_index, select_index, Inspection, InvalidInputError, PROMPT};
use ndarray::prelude::*;
use std::io::{Cursor, ErrorKind};

/// Runs the selector on scripted input; returns the index and how many prompts were shown.
fn run_selector(input: &str, upper_bound: usize) -> std::io::Result<(usize, usize)> {
    let mut reader = Cursor::new(input.as_bytes().to_vec());
    let mut output = Vec::new();
    let index = select_index(&mut reader, &mut output, upper_bound)?;
    let shown = String::from_utf8(output).unwrap();
    Ok((index, shown.matches(PROMPT).count()))
}

#[test]
fn valid_first_answer_is_accepted_without_reprompt() {
    assert_eq!(run_selector("42\n", 10_000).unwrap(), (42, 1));
    assert_eq!(run_selector("0\n", 10_000).unwrap(), (0, 1));
    assert_eq!(run_selector("9999\n", 10_000).unwrap(), (9999, 1));
}

#[test]
fn non_digit_answer_reprompts_once() {
    assert_eq!(run_selector("abc\n7\n", 10_000).unwrap(), (7, 2));
    assert_eq!(run_selector("-3\n3\n", 10_000).unwrap(), (3, 2));
    assert_eq!(run_selector("\n5\n", 10_000).unwrap(), (5, 2));
}

#[test]
fn out_of_range_answer_reprompts_once() {
    assert_eq!(run_selector("10000\n12\n", 10_000).unwrap(), (12, 2));
    assert_eq!(run_selector("123456789\n1\n", 10_000).unwrap(), (1, 2));
}

#[test]
fn keeps_prompting_until_valid() {
    assert_eq!(
        run_selector("x\n10\n-1\n 4\n4\n", 10).unwrap(),
        (4, 5)
    );
}

#[test]
fn last_line_without_newline_is_read() {
    assert_eq!(run_selector("8", 10).unwrap(), (8, 1));
}

#[test]
fn closed_input_is_an_error() {
    let err = run_selector("abc\n", 10).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    let err = run_selector("", 10).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
}

#[test]
fn parse_errors_name_the_problem() {
    assert_eq!(
        parse_index("abc", 10),
        Err(InvalidInputError::NotADigit("abc".to_string()))
    );
    assert_eq!(
        parse_index("10", 10),
        Err(InvalidInputError::OutOfRange {
            index: "10".to_string(),
            upper_bound: 10
        })
    );
}

#[test]
fn inspection_reports_argmax_and_label() {
    let test_size = 10_000;
    let mut predictions = Array2::<f32>::zeros((test_size, 10));
    predictions.row_mut(42).assign(&array![0.1, -2.0, 0.3, 4.5, 0.0, 1.0, 2.2, -0.5, 3.9, 0.0]);
    let mut labels = vec![0u8; test_size];
    labels[42] = 5;

    let index = run_selector("42\n", test_size).unwrap().0;
    let inspection = Inspection::new(&predictions, &labels, index);

    assert_eq!(inspection.predicted, 3);
    assert_eq!(inspection.actual, 5);
    assert_eq!(inspection.predicted_name(), "cat");
    assert_eq!(inspection.actual_name(), "dog");
    assert_eq!(
        inspection.to_string(),
        "Real Value: dog - Predicted Value: cat"
    );
}
