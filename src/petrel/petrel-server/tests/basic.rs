mod common;

use common::{local_test, run_session, LocalOnlyHandler};
use petrel_server::{DefaultHandler, MemoryMailboxes};

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn basic_accept_with_dot_unstuffing() {
    let mut config = local_test();
    config.server.name = "mail.example.com".to_owned();
    config.server.esmtp.smtputf8 = false;
    config.server.esmtp.chunking = false;
    config.server.esmtp.binarymime = false;
    config.server.esmtp.dsn = false;
    config.server.esmtp.limits = false;
    config.server.esmtp.mt_priority = false;

    let mailboxes = MemoryMailboxes::new();
    let handler = Box::new(DefaultHandler::new(
        None,
        Some(std::sync::Arc::new(mailboxes.clone())),
    ));

    run_session(
        config,
        handler,
        &[
            ("", &["220 mail.example.com ESMTP petrel"]),
            (
                "EHLO client.test\r\n",
                &[
                    "250-mail.example.com Hello client.test",
                    "250-SIZE 35882577",
                    "250-8BITMIME",
                    "250-PIPELINING",
                    "250 ENHANCEDSTATUSCODES",
                ],
            ),
            ("MAIL FROM:<a@x>\r\n", &["250 2.1.0 Sender OK"]),
            ("RCPT TO:<b@local>\r\n", &["250 2.1.5 Recipient OK"]),
            (
                "DATA\r\n",
                &["354 Enter mail, end with \".\" on a line by itself"],
            ),
            (
                "Subject: hi\r\n\r\n.hello\r\n.\r\n",
                &["250 2.0.0 Message accepted for delivery"],
            ),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;

    // leading dots stripped, terminator consumed
    assert_eq!(
        mailboxes.messages("b@local"),
        vec![b"Subject: hi\r\n\r\nhello\r\n".to_vec()]
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn helo_greeting() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            (
                "HELO client.test\r\n",
                &["250 testserver.com Hello client.test"],
            ),
            ("NOOP\r\n", &["250 2.0.0 OK"]),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn mail_before_greeting_is_refused() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("MAIL FROM:<a@x>\r\n", &["503 5.5.1 EHLO/HELO required"]),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn out_of_order_commands_leave_the_state_unchanged() {
    run_session(
        local_test(),
        Box::new(LocalOnlyHandler {
            domain: "local".to_owned(),
        }),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            (
                "EHLO client.test\r\nRCPT TO:<b@local>\r\nDATA\r\n",
                &[
                    "250-testserver.com Hello client.test",
                    "250-SIZE 35882577",
                    "250-8BITMIME",
                    "250-SMTPUTF8",
                    "250-PIPELINING",
                    "250-CHUNKING",
                    "250-BINARYMIME",
                    "250-ENHANCEDSTATUSCODES",
                    "250-DSN",
                    "250-LIMITS RCPTMAX=100",
                    "250 MT-PRIORITY",
                    // RCPT without a transaction, DATA without a recipient
                    "503 5.5.1 Bad sequence of commands",
                    "503 5.5.1 Bad sequence of commands",
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
async fn unknown_commands_and_bad_lines() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("FROBNICATE now\r\n", &["500 5.5.2 Command unrecognized"]),
            (
                "NOOP bare\rreturn\r\n",
                &["500 5.5.2 Bare CR or LF is not allowed"],
            ),
            (
                &format!("MAIL FROM:<{}@x.org>\r\n", "a".repeat(600)),
                &["500 5.5.6 Line too long"],
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
async fn rset_is_idempotent() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("HELO client.test\r\n", &["250 testserver.com Hello client.test"]),
            ("MAIL FROM:<a@x>\r\n", &["250 2.1.0 Sender OK"]),
            ("RSET\r\n", &["250 2.0.0 Reset state"]),
            ("RSET\r\n", &["250 2.0.0 Reset state"]),
            // the envelope is gone: RCPT needs a fresh MAIL FROM
            (
                "RCPT TO:<b@local>\r\n",
                &["503 5.5.1 Bad sequence of commands"],
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
async fn vrfy_declines_by_default() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            (
                "VRFY postmaster\r\n",
                &["252 2.0.0 Cannot verify, will attempt delivery"],
            ),
            (
                "EXPN staff\r\n",
                &["502 5.5.1 Command not implemented"],
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
async fn a_second_greeting_discards_the_transaction() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("HELO a.test\r\n", &["250 testserver.com Hello a.test"]),
            ("MAIL FROM:<a@x>\r\n", &["250 2.1.0 Sender OK"]),
            ("HELO b.test\r\n", &["250 testserver.com Hello b.test"]),
            (
                "RCPT TO:<b@local>\r\n",
                &["503 5.5.1 Bad sequence of commands"],
            ),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;
}
