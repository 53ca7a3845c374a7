mod common;

use common::{local_test, run_session, LocalOnlyHandler};
use petrel_server::{DefaultHandler, MemoryMailboxes};

fn local_handler() -> Box<LocalOnlyHandler> {
    Box::new(LocalOnlyHandler {
        domain: "local".to_owned(),
    })
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn relay_denied_mid_window() {
    run_session(
        local_test(),
        local_handler(),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("HELO client.test\r\n", &["250 testserver.com Hello client.test"]),
            // both commands in one window; replies come back in command order
            (
                "MAIL FROM:<a@x>\r\nRCPT TO:<b@elsewhere>\r\n",
                &["250 2.1.0 Sender OK", "550 5.7.1 Relaying denied"],
            ),
            (
                "RCPT TO:<b@local>\r\n",
                &["250 2.1.5 Recipient OK"],
            ),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn pipelined_rset_clears_the_envelope() {
    run_session(
        local_test(),
        local_handler(),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("HELO client.test\r\n", &["250 testserver.com Hello client.test"]),
            (
                "MAIL FROM:<a@b>\r\nRCPT TO:<c@local>\r\nRSET\r\nMAIL FROM:<d@e>\r\n",
                &[
                    "250 2.1.0 Sender OK",
                    "250 2.1.5 Recipient OK",
                    "250 2.0.0 Reset state",
                    "250 2.1.0 Sender OK",
                ],
            ),
            // the reset dropped the recipient: DATA has nothing to work on
            ("DATA\r\n", &["503 5.5.1 Bad sequence of commands"]),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn a_whole_transaction_in_one_window() {
    let mailboxes = MemoryMailboxes::new();
    let handler = Box::new(DefaultHandler::new(
        None,
        Some(std::sync::Arc::new(mailboxes.clone())),
    ));

    run_session(
        local_test(),
        handler,
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("HELO client.test\r\n", &["250 testserver.com Hello client.test"]),
            // the bytes after DATA are already the message body
            (
                "MAIL FROM:<john@doe>\r\nRCPT TO:<galvin@tis.com>\r\nDATA\r\nbody line\r\n.\r\n",
                &[
                    "250 2.1.0 Sender OK",
                    "250 2.1.5 Recipient OK",
                    "354 Enter mail, end with \".\" on a line by itself",
                    "250 2.0.0 Message accepted for delivery",
                ],
            ),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;

    assert_eq!(
        mailboxes.messages("galvin@tis.com"),
        vec![b"body line\r\n".to_vec()]
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn an_unknown_command_does_not_derail_the_window() {
    run_session(
        local_test(),
        local_handler(),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("HELO client.test\r\n", &["250 testserver.com Hello client.test"]),
            (
                "MAIL FROM:<john@doe>\r\nNOTACOMMAND and its args\r\nRCPT TO:<fitz@local>\r\n",
                &[
                    "250 2.1.0 Sender OK",
                    "500 5.5.2 Command unrecognized",
                    "250 2.1.5 Recipient OK",
                ],
            ),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn too_many_recipients_are_temp_rejected() {
    let mut config = local_test();
    config.server.smtp.rcpt_count_max = 100;

    let mut window = String::from("MAIL FROM:<a@x>\r\n");
    let mut expected = vec!["250 2.1.0 Sender OK".to_owned()];
    for i in 0..101 {
        window.push_str(&format!("RCPT TO:<user{i}@local>\r\n"));
        expected.push(if i < 100 {
            "250 2.1.5 Recipient OK".to_owned()
        } else {
            "452 4.5.3 Too many recipients".to_owned()
        });
    }
    let expected = expected.iter().map(String::as_str).collect::<Vec<_>>();

    run_session(
        config,
        local_handler(),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("HELO client.test\r\n", &["250 testserver.com Hello client.test"]),
            (window.as_str(), expected.as_slice()),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;
}
