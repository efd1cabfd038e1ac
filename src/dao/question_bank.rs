use std::{fs, path::Path, sync::Arc};

use futures::future::BoxFuture;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    dao::{
        models::QuizEntity,
        storage::{StorageError, StorageResult},
    },
    state::quiz::{Question, QuestionType, Quiz},
};

/// Read access to the stored quizzes.
pub trait QuestionBank: Send + Sync {
    /// Every multiple choice question of every quiz, used to assemble random games.
    fn get_all_qcm_questions(&self) -> BoxFuture<'static, StorageResult<Vec<Question>>>;
    /// Quiz with identifier `id`, if any.
    fn find_quiz(&self, id: &str) -> BoxFuture<'static, StorageResult<Option<Quiz>>>;
}

/// [`QuestionBank`] serving a catalogue loaded once from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct JsonQuestionBank {
    quizzes: Arc<Vec<Quiz>>,
}

impl JsonQuestionBank {
    /// Build a bank from already validated quizzes.
    pub fn new(quizzes: Vec<Quiz>) -> Self {
        Self {
            quizzes: Arc::new(quizzes),
        }
    }

    /// Load and validate the catalogue stored at `path`.
    ///
    /// Invalid quizzes are skipped with a warning; an unreadable or unparsable file is an error.
    pub fn from_file(path: &Path) -> StorageResult<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            StorageError::unavailable(format!("cannot read `{}`", path.display()), err)
        })?;
        let entities: Vec<QuizEntity> = serde_json::from_str(&contents).map_err(|err| {
            StorageError::unavailable(format!("cannot parse `{}`", path.display()), err)
        })?;

        let quizzes: Vec<Quiz> = entities
            .into_iter()
            .filter_map(|entity| match entity.validate() {
                Ok(()) => Some(entity.into()),
                Err(errors) => {
                    warn!(quiz_id = %entity.id, error = %errors, "skipping invalid quiz");
                    None
                }
            })
            .collect();

        info!(path = %path.display(), count = quizzes.len(), "loaded quiz catalogue");
        Ok(Self::new(quizzes))
    }

    /// Number of quizzes served.
    pub fn len(&self) -> usize {
        self.quizzes.len()
    }

    /// Whether the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.quizzes.is_empty()
    }
}

impl QuestionBank for JsonQuestionBank {
    fn get_all_qcm_questions(&self) -> BoxFuture<'static, StorageResult<Vec<Question>>> {
        let quizzes = Arc::clone(&self.quizzes);
        Box::pin(async move {
            Ok(quizzes
                .iter()
                .flat_map(|quiz| quiz.questions.iter())
                .filter(|question| question.kind == QuestionType::Qcm)
                .cloned()
                .collect())
        })
    }

    fn find_quiz(&self, id: &str) -> BoxFuture<'static, StorageResult<Option<Quiz>>> {
        let quizzes = Arc::clone(&self.quizzes);
        let id = id.to_string();
        Box::pin(async move { Ok(quizzes.iter().find(|quiz| quiz.id == id).cloned()) })
    }
}
