mod common;

use common::{local_test, run_session, EHLO_DEFAULT};
use petrel_server::DefaultHandler;

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn dsn_and_priority_parameters_are_recorded() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("EHLO client.test\r\n", EHLO_DEFAULT),
            (
                "MAIL FROM:<a@x> RET=HDRS ENVID=QQ314159 MT-PRIORITY=3\r\n",
                &["250 2.1.0 Sender OK"],
            ),
            (
                "RCPT TO:<b@local> NOTIFY=SUCCESS,FAILURE ORCPT=rfc822;b@local\r\n",
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
async fn disabled_extensions_refuse_their_parameters() {
    let mut config = local_test();
    config.server.esmtp.dsn = false;
    config.server.esmtp.mt_priority = false;
    config.server.esmtp.smtputf8 = false;

    run_session(
        config,
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            (
                "EHLO client.test\r\n",
                &[
                    "250-testserver.com Hello client.test",
                    "250-SIZE 35882577",
                    "250-8BITMIME",
                    "250-PIPELINING",
                    "250-CHUNKING",
                    "250-BINARYMIME",
                    "250-ENHANCEDSTATUSCODES",
                    "250 LIMITS RCPTMAX=100",
                ],
            ),
            (
                "MAIL FROM:<a@x> MT-PRIORITY=3\r\n",
                &["555 5.5.4 MT-PRIORITY is not available here"],
            ),
            (
                "MAIL FROM:<a@x> ENVID=QQ314159\r\n",
                &["555 5.5.4 DSN is not available here"],
            ),
            (
                "MAIL FROM:<a@x> SMTPUTF8\r\n",
                &["555 5.5.4 SMTPUTF8 is not available here"],
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
async fn requiretls_needs_a_secured_channel() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("EHLO client.test\r\n", EHLO_DEFAULT),
            (
                "MAIL FROM:<a@x> REQUIRETLS\r\n",
                &["555 5.5.4 REQUIRETLS is not available here"],
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
async fn hold_requests_are_bounded() {
    let mut config = local_test();
    config.server.esmtp.future_release = Some(std::time::Duration::from_secs(3600));

    run_session(
        config,
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            // HELO on purpose: the FUTURERELEASE capability line carries a
            // moving release date the transcript cannot pin down
            (
                "HELO client.test\r\n",
                &["250 testserver.com Hello client.test"],
            ),
            (
                "MAIL FROM:<a@x> HOLDFOR=60\r\n",
                &["250 2.1.0 Sender OK"],
            ),
            ("RSET\r\n", &["250 2.0.0 Reset state"]),
            (
                "MAIL FROM:<a@x> HOLDFOR=7200\r\n",
                &["552 5.3.4 Requested hold time exceeds the maximum"],
            ),
            (
                "MAIL FROM:<a@x> HOLDFOR=60 HOLDUNTIL=2038-01-19T03:14:07Z\r\n",
                &["501 5.5.4 Duplicated parameter"],
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
async fn utf8_mailboxes_need_the_smtputf8_parameter() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("EHLO client.test\r\n", EHLO_DEFAULT),
            (
                "MAIL FROM:<andré@x.org>\r\n",
                &["553 5.6.7 The mailbox requires SMTPUTF8"],
            ),
            (
                "MAIL FROM:<andré@x.org> SMTPUTF8\r\n",
                &["250 2.1.0 Sender OK"],
            ),
            (
                "RCPT TO:<rené@local>\r\n",
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
async fn duplicated_and_unknown_keywords() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            ("EHLO client.test\r\n", EHLO_DEFAULT),
            (
                "MAIL FROM:<a@x> SIZE=1 SIZE=2\r\n",
                &["501 5.5.4 Duplicated parameter"],
            ),
            (
                "MAIL FROM:<a@x> FROBNICATE=1\r\n",
                &["555 5.5.4 Parameter not recognized or not implemented"],
            ),
            (
                "MAIL FROM:<galvin@>\r\n",
                &["553 5.1.7 The address <galvin@> is not a valid RFC 5321 address"],
            ),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;
}
